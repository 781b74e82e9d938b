//! Gap-free playback timeline with barge-in flush.

use std::collections::BTreeMap;

use tracing::debug;

use super::{OutputDevice, ScheduledSource, SourceId};
use crate::codec::DecodedChunk;

/// Cursor value after an interruption. Device time is never negative, so the
/// `max(cursor, now)` guard in `enqueue` always re-anchors from here.
pub const CURSOR_SENTINEL: f64 = 0.0;

/// Owns the output timeline and the set of scheduled-or-playing sources.
pub struct PlaybackScheduler<O: OutputDevice> {
    device: O,
    /// End of already-committed audio, in device seconds.
    next_start_time: f64,
    sources: BTreeMap<SourceId, ScheduledSource>,
    next_id: u64,
    finished_scratch: Vec<SourceId>,
}

impl<O: OutputDevice> PlaybackScheduler<O> {
    pub fn new(device: O) -> Self {
        Self {
            device,
            next_start_time: CURSOR_SENTINEL,
            sources: BTreeMap::new(),
            next_id: 0,
            finished_scratch: Vec::new(),
        }
    }

    /// Align the cursor with the device clock. Called on session open.
    pub fn reset(&mut self) {
        self.next_start_time = self.device.current_time();
        debug!(cursor = self.next_start_time, "playback cursor reset");
    }

    /// Schedule `chunk` directly after everything already committed.
    ///
    /// Returns `None` for a chunk with no frames; nothing is scheduled and the
    /// cursor does not move.
    pub fn enqueue(&mut self, chunk: DecodedChunk) -> Option<ScheduledSource> {
        if chunk.is_empty() {
            return None;
        }
        let start_at = self.next_start_time.max(self.device.current_time());
        let source = ScheduledSource {
            id: SourceId(self.next_id),
            start_at,
            duration: chunk.duration(),
        };
        self.next_id += 1;

        self.device.start(source.id, chunk, start_at);
        self.next_start_time = source.end_at();
        self.sources.insert(source.id, source);

        debug!(
            id = source.id.0,
            start_at,
            duration = source.duration,
            queued = self.sources.len(),
            "chunk scheduled"
        );
        Some(source)
    }

    /// Stop and forget every tracked source, then invalidate the cursor.
    ///
    /// Returns how many sources were flushed.
    pub fn interrupt(&mut self) -> usize {
        let flushed = self.sources.len();
        for id in std::mem::take(&mut self.sources).into_keys() {
            self.device.stop(id);
        }
        self.next_start_time = CURSOR_SENTINEL;
        debug!(flushed, "playback interrupted");
        flushed
    }

    /// Remove sources the device reports as played to completion.
    pub fn poll_completions(&mut self) -> usize {
        self.finished_scratch.clear();
        self.device.drain_finished(&mut self.finished_scratch);
        let mut removed = 0;
        for id in &self.finished_scratch {
            if self.sources.remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn cursor(&self) -> f64 {
        self.next_start_time
    }

    /// Number of sources scheduled or currently playing.
    pub fn tracked(&self) -> usize {
        self.sources.len()
    }

    pub fn sources(&self) -> impl Iterator<Item = &ScheduledSource> {
        self.sources.values()
    }

    /// Seconds of committed audio still ahead of the device clock.
    pub fn buffered_secs(&self) -> f64 {
        (self.next_start_time - self.device.current_time()).max(0.0)
    }

    pub fn device(&self) -> &O {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut O {
        &mut self.device
    }
}
