//! `ParleyEngine`: thread-owning handle around the dispatch loop.
//!
//! ## Lifecycle
//!
//! ```text
//! ParleyEngine::start(config, sink)   → engine thread spawned, output device open
//!     ├─► on_open()                   → timeline realigned, status = Connected
//!     ├─► start_recording()           → mic acquired, status = Recording
//!     ├─► on_audio_chunk(..)          → decoded + scheduled
//!     ├─► on_interrupted()            → queued playback flushed
//!     ├─► stop_recording()            → graph torn down, status = Stopped
//!     └─► shutdown() / drop           → capture stopped, playback flushed, thread joined
//! ```
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so both devices are opened
//! *inside* the engine thread and never leave it. A sync channel carries the
//! open result back to `start()`, which blocks until the output device is
//! confirmed (or failed).
//!
//! The `on_*` methods are the inbound callback surface of the session
//! adapter. They only enqueue; ordering across them is preserved.

pub mod dispatch;

pub use dispatch::{
    DiagnosticsSnapshot, EngineDiagnostics, EngineEvent, EngineMessage, EngineSignals, VoiceEngine,
};

use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::{input::CpalInput, output::CpalOutput},
    capture::InputDevice,
    config::EngineConfig,
    error::{ParleyError, Result},
    ipc::events::{EngineStatus, LevelEvent, StatusEvent},
    playback::OutputDevice,
    session::{message::ServerMessage, OutboundSink},
};

pub struct ParleyEngine {
    tx: Sender<EngineMessage>,
    signals: EngineSignals,
    thread: Option<JoinHandle<()>>,
}

impl ParleyEngine {
    /// Start an engine on the cpal default (or configured) devices.
    ///
    /// # Errors
    /// - `ParleyError::NoDefaultOutputDevice` / `ParleyError::Playback` when
    ///   the output device cannot be opened.
    pub fn start<S>(config: EngineConfig, sink: S) -> Result<Self>
    where
        S: OutboundSink + Send + 'static,
    {
        Self::start_with(config, sink, |config| {
            let output = CpalOutput::open(config)?;
            let input = CpalInput::new(config.preferred_input_device.clone());
            Ok((input, output))
        })
    }

    /// Start an engine on devices built by `open`, which runs on the engine thread.
    pub fn start_with<I, O, S, F>(config: EngineConfig, sink: S, open: F) -> Result<Self>
    where
        I: InputDevice + 'static,
        O: OutputDevice + 'static,
        S: OutboundSink + Send + 'static,
        F: FnOnce(&EngineConfig) -> Result<(I, O)> + Send + 'static,
    {
        let (tx, rx) = unbounded::<EngineMessage>();
        let signals = EngineSignals::new();
        let thread_signals = signals.clone();
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread = std::thread::Builder::new()
            .name("parley-engine".into())
            .spawn(move || {
                // ── Open devices (must happen on THIS thread) ──────────────
                let (input, output) = match open(&config) {
                    Ok(devices) => devices,
                    Err(e) => {
                        thread_signals.set_status(EngineStatus::Error, Some(e.to_string()));
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let _ = open_tx.send(Ok(()));

                let engine = VoiceEngine::new(input, output, sink, &config, thread_signals);
                dispatch::run(engine, rx);
                // Streams drop here, releasing the devices on this thread.
            })?;

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!("engine started");
                Ok(Self {
                    tx,
                    signals,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(ParleyError::Other(anyhow::anyhow!(
                    "engine thread died before opening devices"
                )))
            }
        }
    }

    // ── Inbound session callbacks ──────────────────────────────────────────

    pub fn on_open(&self) -> Result<()> {
        self.send(EngineMessage::Event(EngineEvent::Opened))
    }

    pub fn on_audio_chunk(&self, data: impl Into<String>, mime_hint: Option<&str>) -> Result<()> {
        self.send(EngineMessage::Event(EngineEvent::ChunkReceived {
            data: data.into(),
            mime_type: mime_hint.map(str::to_owned),
        }))
    }

    pub fn on_interrupted(&self) -> Result<()> {
        self.send(EngineMessage::Event(EngineEvent::Interrupted))
    }

    pub fn on_error(&self, message: impl Into<String>) -> Result<()> {
        self.send(EngineMessage::Event(EngineEvent::Errored(message.into())))
    }

    pub fn on_close(&self, reason: impl Into<String>) -> Result<()> {
        self.send(EngineMessage::Event(EngineEvent::Closed(reason.into())))
    }

    /// Parse a raw server JSON frame and enqueue the events it carries.
    ///
    /// # Errors
    /// `ParleyError::Transport` for an unparseable frame (also reported on
    /// the status signal).
    pub fn on_server_message(&self, raw: &str) -> Result<()> {
        let message = match ServerMessage::from_json(raw) {
            Ok(m) => m,
            Err(e) => {
                self.signals.report(e.to_string());
                return Err(e);
            }
        };
        for event in message.into_events() {
            self.send(EngineMessage::Event(event))?;
        }
        Ok(())
    }

    // ── Controls ───────────────────────────────────────────────────────────

    /// Acquire the microphone. Blocks until acquisition succeeds or fails.
    ///
    /// # Errors
    /// `ParleyError::Acquisition` / `NoDefaultInputDevice`, or `EngineStopped`.
    pub fn start_recording(&self) -> Result<()> {
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        self.send(EngineMessage::StartRecording(reply_tx))?;
        reply_rx.recv().map_err(|_| ParleyError::EngineStopped)?
    }

    /// Stop recording. Blocks until the capture graph is gone; no block is
    /// forwarded to the sink after this returns.
    ///
    /// # Errors
    /// `EngineStopped` when the engine thread has exited.
    pub fn stop_recording(&self) -> Result<()> {
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        self.send(EngineMessage::StopRecording(reply_tx))?;
        reply_rx.recv().map_err(|_| ParleyError::EngineStopped)
    }

    /// Stop the engine thread and wait for it to release the devices.
    pub fn shutdown(mut self) {
        self.join();
    }

    // ── Observability ──────────────────────────────────────────────────────

    pub fn status(&self) -> StatusEvent {
        self.signals.status()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.signals.status_tx.subscribe()
    }

    pub fn subscribe_levels(&self) -> broadcast::Receiver<LevelEvent> {
        self.signals.level_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.signals.diagnostics.snapshot()
    }

    // ── Internal helpers ───────────────────────────────────────────────────

    fn send(&self, message: EngineMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| ParleyError::EngineStopped)
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(EngineMessage::Shutdown);
            if thread.join().is_err() {
                tracing::error!("engine thread panicked");
            }
        }
    }
}

impl Drop for ParleyEngine {
    fn drop(&mut self) {
        self.join();
    }
}
