//! Microphone capture: device → ring → rate converter → gain → block framer → encoder → sink.
//!
//! # Real-time constraints
//!
//! The device callback only mono-mixes and pushes into the SPSC ring; it never
//! allocates after warm-up, never locks and never encodes. Everything else runs
//! on the engine thread when [`CapturePipeline::pump`] is called.

pub mod pipeline;

pub use pipeline::{BlockOutcome, CaptureConfig, CapturePipeline, CaptureState};

use std::sync::{atomic::AtomicBool, Arc};

use crate::{buffering::AudioProducer, error::Result};

/// An input device that can be acquired and released repeatedly.
pub trait InputDevice {
    /// Open the device and start pushing mono f32 samples into `producer`.
    ///
    /// The device callback must drop samples while `recording` is `false`.
    /// `preferred_rate` is a hint; the actual delivered rate is returned.
    ///
    /// # Errors
    /// Permission denied, missing device, or stream construction failure.
    fn acquire(
        &mut self,
        producer: AudioProducer,
        recording: Arc<AtomicBool>,
        preferred_rate: u32,
    ) -> Result<u32>;

    /// Stop the stream and release the device. Must be safe to call when not acquired.
    fn release(&mut self);

    /// Whether the device reported a fatal stream error since the last acquire.
    fn is_lost(&self) -> bool {
        false
    }
}
