//! Single-threaded dispatch loop.
//!
//! ## Per iteration
//!
//! ```text
//! 1. Wait up to POLL_INTERVAL for the next EngineMessage, then drain the rest
//!    (session events and control commands, strictly in arrival order)
//! 2. Collect playback completions from the output device
//! 3. Check for input device loss
//! 4. Drain the capture ring → BlockCaptured events → encode → sink
//! ```
//!
//! Everything the engine owns is touched only from this loop, so the recording
//! flag, the scheduler's source set and the timeline cursor need no locks.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    buffering::block::SampleBuffer,
    capture::{BlockOutcome, CapturePipeline, CaptureState, InputDevice},
    codec::{decode_chunk, parse_pcm_rate},
    config::EngineConfig,
    error::Result,
    ipc::events::{EngineStatus, LevelDirection, LevelEvent, StatusEvent},
    playback::{OutputDevice, PlaybackScheduler, ScheduledSource},
    session::OutboundSink,
};

/// Broadcast channel capacity for status and level events.
const BROADCAST_CAP: usize = 256;

/// Upper bound on how long the loop sleeps waiting for a message.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything that drives the engine, in one ordered stream.
#[derive(Debug)]
pub enum EngineEvent {
    /// Session is ready; realign the playback timeline.
    Opened,
    /// One framed microphone block.
    BlockCaptured(SampleBuffer),
    /// Inbound base64 PCM with an optional MIME hint such as `audio/pcm;rate=24000`.
    ChunkReceived {
        data: String,
        mime_type: Option<String>,
    },
    /// Barge-in: drop all queued assistant audio.
    Interrupted,
    Errored(String),
    Closed(String),
}

/// Messages accepted by the engine thread.
pub enum EngineMessage {
    Event(EngineEvent),
    StartRecording(std::sync::mpsc::Sender<Result<()>>),
    /// Acknowledged once the capture graph is dropped.
    StopRecording(std::sync::mpsc::Sender<()>),
    Shutdown,
}

#[derive(Default)]
pub struct EngineDiagnostics {
    pub blocks_captured: AtomicUsize,
    pub blocks_sent: AtomicUsize,
    pub blocks_discarded: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub chunks_scheduled: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub interruptions: AtomicUsize,
    pub sources_flushed: AtomicUsize,
    /// Committed playback still ahead of the device clock, in milliseconds.
    pub playback_buffered_ms: AtomicUsize,
}

impl EngineDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            blocks_sent: self.blocks_sent.load(Ordering::Relaxed),
            blocks_discarded: self.blocks_discarded.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            sources_flushed: self.sources_flushed.load(Ordering::Relaxed),
            playback_buffered_ms: self.playback_buffered_ms.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicUsize, by: usize) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub blocks_captured: usize,
    pub blocks_sent: usize,
    pub blocks_discarded: usize,
    pub chunks_received: usize,
    pub chunks_scheduled: usize,
    pub chunks_dropped: usize,
    pub interruptions: usize,
    pub sources_flushed: usize,
    pub playback_buffered_ms: usize,
}

/// Shared, thread-safe outputs of an engine: status snapshot, broadcasts, counters.
#[derive(Clone)]
pub struct EngineSignals {
    pub status: Arc<Mutex<StatusEvent>>,
    pub status_tx: broadcast::Sender<StatusEvent>,
    pub level_tx: broadcast::Sender<LevelEvent>,
    pub diagnostics: Arc<EngineDiagnostics>,
    level_seq: Arc<AtomicU64>,
}

impl EngineSignals {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (level_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            status: Arc::new(Mutex::new(StatusEvent {
                status: EngineStatus::Idle,
                detail: None,
            })),
            status_tx,
            level_tx,
            diagnostics: Arc::new(EngineDiagnostics::default()),
            level_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn status(&self) -> StatusEvent {
        self.status.lock().clone()
    }

    pub fn set_status(&self, status: EngineStatus, detail: Option<String>) {
        let event = StatusEvent { status, detail };
        *self.status.lock() = event.clone();
        let _ = self.status_tx.send(event);
    }

    /// Publish a detail message without changing the status value.
    pub fn report(&self, detail: String) {
        let status = self.status.lock().status;
        self.set_status(status, Some(detail));
    }

    fn level(&self, direction: LevelDirection, rms: f32) {
        if self.level_tx.receiver_count() == 0 {
            return;
        }
        let seq = self.level_seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.level_tx.send(LevelEvent {
            seq,
            direction,
            rms,
        });
    }
}

impl Default for EngineSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// The engine proper: owns input, output and the outbound sink.
pub struct VoiceEngine<I: InputDevice, O: OutputDevice, S: OutboundSink> {
    capture: CapturePipeline<I>,
    scheduler: PlaybackScheduler<O>,
    sink: S,
    signals: EngineSignals,
    output_sample_rate: u32,
    output_channels: usize,
    session_open: bool,
    block_scratch: Vec<SampleBuffer>,
}

impl<I: InputDevice, O: OutputDevice, S: OutboundSink> VoiceEngine<I, O, S> {
    pub fn new(input: I, output: O, sink: S, config: &EngineConfig, signals: EngineSignals) -> Self {
        Self {
            capture: CapturePipeline::new(input, config.capture_config()),
            scheduler: PlaybackScheduler::new(output),
            sink,
            signals,
            output_sample_rate: config.output_sample_rate,
            output_channels: config.output_channels,
            session_open: false,
            block_scratch: Vec::new(),
        }
    }

    /// Apply one event. Failures become status updates; nothing propagates.
    pub fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Opened => {
                self.session_open = true;
                self.scheduler.reset();
                info!("session opened");
                self.signals
                    .set_status(EngineStatus::Connected, Some("session opened".into()));
            }
            EngineEvent::BlockCaptured(block) => self.forward_block(&block),
            EngineEvent::ChunkReceived { data, mime_type } => {
                if let Err(e) = self.receive_chunk(&data, mime_type.as_deref()) {
                    warn!("dropping inbound chunk: {e}");
                    self.signals.report(e.to_string());
                }
            }
            EngineEvent::Interrupted => {
                let flushed = self.scheduler.interrupt();
                EngineDiagnostics::bump(&self.signals.diagnostics.interruptions, 1);
                EngineDiagnostics::bump(&self.signals.diagnostics.sources_flushed, flushed);
                self.publish_buffered();
                info!(flushed, "playback interrupted by remote");
            }
            EngineEvent::Errored(message) => {
                warn!("session error: {message}");
                self.signals.set_status(EngineStatus::Error, Some(message));
            }
            EngineEvent::Closed(reason) => {
                self.session_open = false;
                info!(reason = reason.as_str(), "session closed");
                self.signals.set_status(EngineStatus::Closed, Some(reason));
            }
        }
    }

    /// Decode and schedule one inbound chunk.
    ///
    /// On error nothing in the engine changes.
    ///
    /// # Errors
    /// `ParleyError::Decode` for bad base64 or a misaligned byte count.
    pub fn receive_chunk(
        &mut self,
        data: &str,
        mime_type: Option<&str>,
    ) -> Result<Option<ScheduledSource>> {
        EngineDiagnostics::bump(&self.signals.diagnostics.chunks_received, 1);
        let rate = mime_type
            .and_then(parse_pcm_rate)
            .unwrap_or(self.output_sample_rate);
        let chunk = match decode_chunk(data, rate, self.output_channels) {
            Ok(chunk) => chunk,
            Err(e) => {
                EngineDiagnostics::bump(&self.signals.diagnostics.chunks_dropped, 1);
                return Err(e.into());
            }
        };
        let rms = chunk.rms();
        let scheduled = self.scheduler.enqueue(chunk);
        if scheduled.is_some() {
            EngineDiagnostics::bump(&self.signals.diagnostics.chunks_scheduled, 1);
            self.signals.level(LevelDirection::Output, rms);
            self.publish_buffered();
        }
        Ok(scheduled)
    }

    /// Acquire the microphone and begin forwarding blocks.
    ///
    /// # Errors
    /// Acquisition failures; the status signal is updated before returning.
    pub fn start_recording(&mut self) -> Result<()> {
        if self.capture.state() == CaptureState::Capturing {
            return Ok(());
        }
        self.signals.set_status(
            EngineStatus::Requesting,
            Some("requesting microphone access".into()),
        );
        match self.capture.start() {
            Ok(()) => {
                self.signals
                    .set_status(EngineStatus::Recording, Some("recording".into()));
                Ok(())
            }
            Err(e) => {
                self.signals
                    .set_status(EngineStatus::Error, Some(format!("could not start recording: {e}")));
                Err(e)
            }
        }
    }

    pub fn stop_recording(&mut self) {
        if self.capture.stop() {
            self.signals
                .set_status(EngineStatus::Stopped, Some("recording stopped".into()));
        }
    }

    /// Service devices: completions, device loss, captured blocks.
    ///
    /// Returns the number of blocks taken from the capture graph.
    pub fn pump(&mut self) -> usize {
        self.scheduler.poll_completions();
        self.publish_buffered();

        if self.capture.device_lost() {
            warn!("input device lost, stopping capture");
            self.capture.stop();
            self.signals
                .set_status(EngineStatus::Error, Some("input device lost".into()));
        }

        let mut blocks = std::mem::take(&mut self.block_scratch);
        let captured = self.capture.pump(&mut blocks);
        EngineDiagnostics::bump(&self.signals.diagnostics.blocks_captured, captured);
        for block in blocks.drain(..) {
            self.handle(EngineEvent::BlockCaptured(block));
        }
        self.block_scratch = blocks;
        captured
    }

    /// Stop capture and flush playback.
    pub fn shutdown(&mut self) {
        self.capture.stop();
        self.scheduler.interrupt();
        debug!("engine shut down");
    }

    fn publish_buffered(&self) {
        let ms = (self.scheduler.buffered_secs() * 1000.0).round() as usize;
        self.signals
            .diagnostics
            .playback_buffered_ms
            .store(ms, Ordering::Relaxed);
    }

    fn forward_block(&mut self, block: &SampleBuffer) {
        match self.capture.process_block(block, &mut self.sink) {
            BlockOutcome::Forwarded => {
                EngineDiagnostics::bump(&self.signals.diagnostics.blocks_sent, 1);
                self.signals.level(LevelDirection::Input, block.rms());
            }
            BlockOutcome::Discarded => {
                EngineDiagnostics::bump(&self.signals.diagnostics.blocks_discarded, 1);
            }
            BlockOutcome::Empty => {}
        }
    }

    pub fn is_session_open(&self) -> bool {
        self.session_open
    }

    pub fn capture(&self) -> &CapturePipeline<I> {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut CapturePipeline<I> {
        &mut self.capture
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<O> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut PlaybackScheduler<O> {
        &mut self.scheduler
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn signals(&self) -> &EngineSignals {
        &self.signals
    }
}

/// Apply one message. Returns `false` when the loop should exit.
pub fn apply<I, O, S>(engine: &mut VoiceEngine<I, O, S>, message: EngineMessage) -> bool
where
    I: InputDevice,
    O: OutputDevice,
    S: OutboundSink,
{
    match message {
        EngineMessage::Event(event) => engine.handle(event),
        EngineMessage::StartRecording(reply) => {
            let _ = reply.send(engine.start_recording());
        }
        EngineMessage::StopRecording(reply) => {
            engine.stop_recording();
            let _ = reply.send(());
        }
        EngineMessage::Shutdown => return false,
    }
    true
}

/// Run until `Shutdown` arrives or every sender is dropped.
pub fn run<I, O, S>(mut engine: VoiceEngine<I, O, S>, rx: Receiver<EngineMessage>)
where
    I: InputDevice,
    O: OutputDevice,
    S: OutboundSink,
{
    info!("engine loop started");
    'outer: loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(message) => {
                if !apply(&mut engine, message) {
                    break;
                }
                while let Ok(message) = rx.try_recv() {
                    if !apply(&mut engine, message) {
                        break 'outer;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        engine.pump();
    }
    engine.shutdown();
    info!("engine loop exited");
}
