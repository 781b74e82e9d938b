//! # parley-core
//!
//! Full-duplex voice streaming engine for realtime conversational sessions.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CpalInput → SPSC RingBuffer → CapturePipeline (resample, 256-sample blocks)
//!                                                   │
//!                                            codec::pcm::encode
//!                                                   │
//!                                         OutboundSink::send(EncodedBlock)
//!
//! Session callbacks → ParleyEngine::on_* → engine thread → codec::pcm::decode_chunk
//!                                                              │
//!                                                   PlaybackScheduler::enqueue
//!                                                              │
//!                                                  CpalOutput → Mixer (cpal callback)
//! ```
//!
//! Neither cpal callback allocates, frees or logs in steady state; retired
//! playback buffers are dropped on the engine thread. Every other piece of
//! state lives on the single engine thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;

// Convenience re-exports for downstream crates
pub use capture::{CapturePipeline, CaptureState, InputDevice};
pub use codec::{DecodedChunk, EncodedBlock};
pub use config::EngineConfig;
pub use engine::{EngineEvent, ParleyEngine, VoiceEngine};
pub use error::{DecodeError, ParleyError};
pub use ipc::events::{EngineStatus, LevelEvent, StatusEvent};
pub use playback::{OutputDevice, PlaybackScheduler, ScheduledSource, SourceId};
pub use session::OutboundSink;
