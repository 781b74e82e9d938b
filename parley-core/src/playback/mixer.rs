//! Sample-accurate renderer for the output device callback.
//!
//! The engine thread sends [`MixerCommand`]s over a bounded crossbeam channel;
//! the callback drains them with `try_recv`, sums every active voice that
//! overlaps the buffer being rendered and reports voices that played to their
//! end. The device clock is the number of frames rendered so far, published
//! through an atomic so the engine thread can read it without locking.
//!
//! Removed voices are handed back over `retired` so their buffers are freed on
//! the engine thread, not inside the callback.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};

use super::SourceId;

/// Planar sample buffers of one voice.
pub type VoiceBuffers = Vec<Vec<f32>>;

pub enum MixerCommand {
    /// Play planar `channels` starting at absolute frame `start_frame`.
    Start {
        id: SourceId,
        start_frame: u64,
        channels: VoiceBuffers,
    },
    Stop(SourceId),
}

struct Voice {
    id: SourceId,
    start_frame: u64,
    channels: VoiceBuffers,
}

impl Voice {
    fn frames(&self) -> u64 {
        self.channels.first().map_or(0, Vec::len) as u64
    }

    fn end_frame(&self) -> u64 {
        self.start_frame + self.frames()
    }
}

/// Channels the callback-side mixer talks through.
pub struct MixerLinks {
    pub commands: Receiver<MixerCommand>,
    pub finished: Sender<SourceId>,
    pub retired: Sender<VoiceBuffers>,
    pub clock: Arc<AtomicU64>,
    /// Completion reports lost to a full `finished` queue.
    pub dropped_reports: Arc<AtomicU64>,
}

/// Lives inside the output callback.
pub struct Mixer {
    links: MixerLinks,
    out_channels: usize,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(links: MixerLinks, out_channels: usize) -> Self {
        Self {
            links,
            out_channels: out_channels.max(1),
            voices: Vec::with_capacity(64),
        }
    }

    /// Render one interleaved buffer and advance the clock by its frame count.
    pub fn render(&mut self, out: &mut [f32]) {
        let base = self.links.clock.load(Ordering::Acquire);
        self.apply_commands(base);

        let ch = self.out_channels;
        let frames = (out.len() / ch) as u64;
        let window_end = base + frames;
        out.fill(0.0);

        for voice in &self.voices {
            let from = voice.start_frame.max(base);
            let to = voice.end_frame().min(window_end);
            if from >= to || voice.channels.is_empty() {
                continue;
            }
            for frame in from..to {
                let src = (frame - voice.start_frame) as usize;
                let dst = (frame - base) as usize * ch;
                for c in 0..ch {
                    let source = &voice.channels[c % voice.channels.len()];
                    out[dst + c] += source[src];
                }
            }
        }

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }

        self.links.clock.store(window_end, Ordering::Release);

        let mut i = 0;
        while i < self.voices.len() {
            if self.voices[i].end_frame() > window_end {
                i += 1;
                continue;
            }
            let voice = self.voices.remove(i);
            if self.links.finished.try_send(voice.id).is_err() {
                self.links.dropped_reports.fetch_add(1, Ordering::Relaxed);
            }
            self.retire(voice);
        }
    }

    fn apply_commands(&mut self, base: u64) {
        while let Ok(cmd) = self.links.commands.try_recv() {
            match cmd {
                MixerCommand::Start {
                    id,
                    start_frame,
                    channels,
                } => {
                    // A start that arrives after its slot has begun plays late
                    // rather than losing its head.
                    let start_frame = start_frame.max(base);
                    self.voices.push(Voice {
                        id,
                        start_frame,
                        channels,
                    });
                }
                MixerCommand::Stop(id) => {
                    if let Some(pos) = self.voices.iter().position(|v| v.id == id) {
                        let voice = self.voices.remove(pos);
                        self.retire(voice);
                    }
                }
            }
        }
    }

    /// Hand buffers back for freeing. Only a full queue frees them here.
    fn retire(&self, voice: Voice) {
        let _ = self.links.retired.try_send(voice.channels);
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn mixer(out_channels: usize) -> (Mixer, Sender<MixerCommand>, Receiver<SourceId>, Arc<AtomicU64>) {
        let (m, tx, done, _, clock) = mixer_with_retired(out_channels);
        (m, tx, done, clock)
    }

    fn mixer_with_retired(
        out_channels: usize,
    ) -> (
        Mixer,
        Sender<MixerCommand>,
        Receiver<SourceId>,
        Receiver<VoiceBuffers>,
        Arc<AtomicU64>,
    ) {
        let (cmd_tx, cmd_rx) = bounded(64);
        let (done_tx, done_rx) = bounded(16);
        let (retired_tx, retired_rx) = bounded(16);
        let clock = Arc::new(AtomicU64::new(0));
        let links = MixerLinks {
            commands: cmd_rx,
            finished: done_tx,
            retired: retired_tx,
            clock: Arc::clone(&clock),
            dropped_reports: Arc::new(AtomicU64::new(0)),
        };
        (Mixer::new(links, out_channels), cmd_tx, done_rx, retired_rx, clock)
    }

    #[test]
    fn back_to_back_voices_leave_no_gap() {
        let (mut m, tx, done, clock) = mixer(1);
        tx.send(MixerCommand::Start {
            id: SourceId(0),
            start_frame: 2,
            channels: vec![vec![0.1; 3]],
        })
        .expect("send");
        tx.send(MixerCommand::Start {
            id: SourceId(1),
            start_frame: 5,
            channels: vec![vec![0.2; 2]],
        })
        .expect("send");

        let mut out = [1.0f32; 8];
        m.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.1, 0.1, 0.1, 0.2, 0.2, 0.0]);
        assert_eq!(clock.load(Ordering::Acquire), 8);
        assert_eq!(done.try_iter().collect::<Vec<_>>(), vec![SourceId(0), SourceId(1)]);
        assert_eq!(m.active_voices(), 0);
    }

    #[test]
    fn voice_spanning_buffers_finishes_in_second() {
        let (mut m, tx, done, _) = mixer(1);
        tx.send(MixerCommand::Start {
            id: SourceId(7),
            start_frame: 0,
            channels: vec![vec![0.5; 6]],
        })
        .expect("send");

        let mut out = [0.0f32; 4];
        m.render(&mut out);
        assert_eq!(out, [0.5; 4]);
        assert!(done.try_recv().is_err());

        m.render(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(done.try_recv().ok(), Some(SourceId(7)));
    }

    #[test]
    fn stop_cuts_voice_without_completion_report() {
        let (mut m, tx, done, _) = mixer(1);
        tx.send(MixerCommand::Start {
            id: SourceId(3),
            start_frame: 0,
            channels: vec![vec![0.5; 100]],
        })
        .expect("send");
        let mut out = [0.0f32; 4];
        m.render(&mut out);

        tx.send(MixerCommand::Stop(SourceId(3))).expect("send");
        m.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(m.active_voices(), 0);
        assert!(done.try_recv().is_err());
    }

    #[test]
    fn mono_voice_fills_every_output_channel() {
        let (mut m, tx, _, clock) = mixer(2);
        tx.send(MixerCommand::Start {
            id: SourceId(0),
            start_frame: 0,
            channels: vec![vec![0.25, -0.25]],
        })
        .expect("send");
        let mut out = [0.0f32; 4];
        m.render(&mut out);
        assert_eq!(out, [0.25, 0.25, -0.25, -0.25]);
        assert_eq!(clock.load(Ordering::Acquire), 2);
    }

    #[test]
    fn late_start_plays_from_its_first_sample() {
        let (mut m, tx, _, _) = mixer(1);
        let mut out = [0.0f32; 4];
        m.render(&mut out);

        tx.send(MixerCommand::Start {
            id: SourceId(0),
            start_frame: 1,
            channels: vec![vec![0.1, 0.2]],
        })
        .expect("send");
        m.render(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn overlapping_voices_are_summed_and_clamped() {
        let (mut m, tx, _, _) = mixer(1);
        for id in 0..3 {
            tx.send(MixerCommand::Start {
                id: SourceId(id),
                start_frame: 0,
                channels: vec![vec![0.5; 2]],
            })
            .expect("send");
        }
        let mut out = [0.0f32; 2];
        m.render(&mut out);
        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn removed_voices_are_handed_back_for_freeing() {
        let (mut m, tx, _, retired, _) = mixer_with_retired(1);
        for id in 0..2 {
            tx.send(MixerCommand::Start {
                id: SourceId(id),
                start_frame: 0,
                channels: vec![vec![0.1; 2 + id as usize * 100]],
            })
            .expect("send");
        }
        let mut out = [0.0f32; 4];
        m.render(&mut out);
        // Voice 0 finished naturally.
        assert_eq!(retired.try_recv().map(|b| b[0].len()).ok(), Some(2));

        tx.send(MixerCommand::Stop(SourceId(1))).expect("send");
        m.render(&mut out);
        assert_eq!(retired.try_recv().map(|b| b[0].len()).ok(), Some(102));
        assert_eq!(m.active_voices(), 0);
    }

    #[test]
    fn full_completion_queue_is_counted() {
        let (cmd_tx, cmd_rx) = bounded(64);
        let (done_tx, _done_rx) = bounded(1);
        let (retired_tx, _retired_rx) = bounded(16);
        let dropped = Arc::new(AtomicU64::new(0));
        let links = MixerLinks {
            commands: cmd_rx,
            finished: done_tx,
            retired: retired_tx,
            clock: Arc::new(AtomicU64::new(0)),
            dropped_reports: Arc::clone(&dropped),
        };
        let mut m = Mixer::new(links, 1);
        for id in 0..3 {
            cmd_tx
                .send(MixerCommand::Start {
                    id: SourceId(id),
                    start_frame: 0,
                    channels: vec![vec![0.0; 1]],
                })
                .expect("send");
        }
        let mut out = [0.0f32; 2];
        m.render(&mut out);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }
}
