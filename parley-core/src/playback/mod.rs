//! Inbound playback: scheduling decoded chunks onto a continuous output timeline.
//!
//! ```text
//! DecodedChunk ─► PlaybackScheduler::enqueue ─► OutputDevice::start(id, chunk, at)
//!                        ▲                               │
//!                        └──── poll_completions ◄────────┘ (finished ids)
//! ```
//!
//! The `OutputDevice` trait is the seam between the timeline bookkeeping and
//! the hardware. `audio::output::CpalOutput` renders through a [`mixer::Mixer`]
//! inside the cpal callback; tests drive a manual clock instead.

pub mod mixer;
pub mod scheduler;

pub use scheduler::PlaybackScheduler;

use crate::codec::DecodedChunk;

/// Identifies one scheduled source for the lifetime of an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

/// A chunk committed to the output device at a fixed start time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Device time (seconds) at which playback begins.
    pub start_at: f64,
    /// Playback length in seconds.
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Contract for the single output bus the scheduler plays into.
///
/// Implementations must report every source that plays to its end exactly
/// once through `drain_finished`. Stopped sources need not be reported.
pub trait OutputDevice {
    /// Current position of the device clock in seconds. Monotonic, never negative.
    fn current_time(&self) -> f64;

    /// Begin playback of `chunk` at device time `at`.
    fn start(&mut self, id: SourceId, chunk: DecodedChunk, at: f64);

    /// Stop a source immediately, mid-sample if need be.
    fn stop(&mut self, id: SourceId);

    /// Append ids of sources that finished naturally since the last call.
    fn drain_finished(&mut self, finished: &mut Vec<SourceId>);
}
