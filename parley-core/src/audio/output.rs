//! Speaker output via cpal.
//!
//! The device clock is the mixer's rendered-frame counter plus a fixed lead,
//! so a source scheduled at `current_time()` lands in a buffer the callback
//! has not rendered yet.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::warn;
#[cfg(feature = "audio-cpal")]
use tracing::{error, info};

use crate::{
    codec::DecodedChunk,
    config::EngineConfig,
    error::{ParleyError, Result},
    playback::{
        mixer::{MixerCommand, VoiceBuffers},
        OutputDevice, SourceId,
    },
};

use crate::audio::resample::resample_to_len;
#[cfg(feature = "audio-cpal")]
use crate::playback::mixer::{Mixer, MixerLinks};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig,
};

/// Capacity of each queue between the engine thread and the callback.
#[cfg(feature = "audio-cpal")]
const LINK_QUEUE: usize = 1024;

/// cpal-backed [`OutputDevice`]. Must stay on the thread that opened it.
pub struct CpalOutput {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    commands: Sender<MixerCommand>,
    finished: Receiver<SourceId>,
    retired: Receiver<VoiceBuffers>,
    clock: Arc<AtomicU64>,
    dropped_reports: Arc<AtomicU64>,
    reported_drops: u64,
    device_rate: u32,
    lead_frames: u64,
}

#[cfg(feature = "audio-cpal")]
impl CpalOutput {
    /// Open the preferred (or default) output device and start rendering silence.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        use crate::audio::device::{select_device, Direction};

        let device = select_device(Direction::Output, config.preferred_output_device.as_deref())
            .ok_or(ParleyError::NoDefaultOutputDevice)?;
        let name = device.name().unwrap_or_default();
        info!(device = name.as_str(), "opening output device");

        let supported = choose_config(&device, config.output_sample_rate)?;
        let device_rate = supported.sample_rate().0;
        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        if device_rate != config.output_sample_rate {
            warn!(
                device_rate,
                wire_rate = config.output_sample_rate,
                "output device does not support wire rate, resampling chunks"
            );
        }
        info!(device_rate, channels = stream_config.channels, format = ?supported.sample_format(), "output config selected");

        // Bounded channels are preallocated, so the callback side never frees
        // channel blocks.
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(LINK_QUEUE);
        let (done_tx, done_rx) = crossbeam_channel::bounded(LINK_QUEUE);
        let (retired_tx, retired_rx) = crossbeam_channel::bounded(LINK_QUEUE);
        let clock = Arc::new(AtomicU64::new(0));
        let dropped_reports = Arc::new(AtomicU64::new(0));
        let mixer = Mixer::new(
            MixerLinks {
                commands: cmd_rx,
                finished: done_tx,
                retired: retired_tx,
                clock: Arc::clone(&clock),
                dropped_reports: Arc::clone(&dropped_reports),
            },
            stream_config.channels as usize,
        );

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, mixer),
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, mixer),
            SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, mixer),
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, mixer),
            fmt => {
                return Err(ParleyError::Playback(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;
        stream
            .play()
            .map_err(|e| ParleyError::Playback(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            commands: cmd_tx,
            finished: done_rx,
            retired: retired_rx,
            clock,
            dropped_reports,
            reported_drops: 0,
            device_rate,
            lead_frames: u64::from(config.output_lead_ms) * u64::from(device_rate) / 1000,
        })
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl CpalOutput {
    pub fn open(_config: &EngineConfig) -> Result<Self> {
        Err(ParleyError::Playback(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

impl CpalOutput {
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

/// Device frame at which time `at` begins.
pub(crate) fn frame_at(at: f64, rate: u32) -> u64 {
    (at.max(0.0) * f64::from(rate)).round() as u64
}

/// Frame range `[start, end)` covered by a source of `duration` seconds
/// starting at `at`.
///
/// Both ends come from the same rounding, so a source that starts where the
/// previous one ended shares its boundary frame exactly.
pub(crate) fn frame_span(at: f64, duration: f64, rate: u32) -> (u64, u64) {
    (frame_at(at, rate), frame_at(at + duration, rate))
}

impl CpalOutput {
    fn send(&self, cmd: MixerCommand) {
        match self.commands.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("mixer command queue full, command dropped"),
            Err(TrySendError::Disconnected(_)) => warn!("output stream gone, command dropped"),
        }
    }
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        let rendered = self.clock.load(Ordering::Acquire);
        (rendered + self.lead_frames) as f64 / f64::from(self.device_rate)
    }

    fn start(&mut self, id: SourceId, chunk: DecodedChunk, at: f64) {
        let (start_frame, end_frame) = frame_span(at, chunk.duration(), self.device_rate);
        let channels = if chunk.sample_rate() == self.device_rate {
            chunk.into_channels()
        } else {
            let frames = (end_frame - start_frame) as usize;
            chunk
                .channels()
                .iter()
                .map(|c| resample_to_len(c, frames))
                .collect()
        };

        let cmd = MixerCommand::Start {
            id,
            start_frame,
            channels,
        };
        self.send(cmd);
    }

    fn stop(&mut self, id: SourceId) {
        self.send(MixerCommand::Stop(id));
    }

    fn drain_finished(&mut self, finished: &mut Vec<SourceId>) {
        finished.extend(self.finished.try_iter());
        // Free stopped and finished buffers here, off the audio thread.
        self.retired.try_iter().for_each(drop);

        let dropped = self.dropped_reports.load(Ordering::Relaxed);
        if dropped > self.reported_drops {
            warn!(
                lost = dropped - self.reported_drops,
                "completion queue overflowed, some sources stay tracked until interrupt"
            );
            self.reported_drops = dropped;
        }
    }
}

/// Prefer a config that runs natively at the wire rate.
#[cfg(feature = "audio-cpal")]
fn choose_config(device: &cpal::Device, rate: u32) -> Result<SupportedStreamConfig> {
    let wanted = SampleRate(rate);
    if let Ok(ranges) = device.supported_output_configs() {
        let mut native: Vec<_> = ranges
            .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
            .filter(|r| {
                matches!(
                    r.sample_format(),
                    SampleFormat::F32 | SampleFormat::I16 | SampleFormat::I32 | SampleFormat::U16
                )
            })
            .collect();
        native.sort_by_key(|r| r.sample_format() != SampleFormat::F32);
        if let Some(range) = native.into_iter().next() {
            return Ok(range.with_sample_rate(wanted));
        }
    }
    device
        .default_output_config()
        .map_err(|e| ParleyError::Playback(e.to_string()))
}

#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut mixer: Mixer,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::with_capacity(16384);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            move |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| ParleyError::Playback(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_spans_share_boundaries_at_uneven_rates() {
        // 0.1 s of 24 kHz audio is 4 410 frames at 44.1 kHz; odd lengths
        // leave fractional boundaries that must still abut.
        let rate = 44_100;
        let mut at = 0.0;
        let mut prev_end = None;
        let mut total = 0;
        for frames_24k in [2_401usize, 2_399, 777, 4_800, 13] {
            let duration = frames_24k as f64 / 24_000.0;
            let (start, end) = frame_span(at, duration, rate);
            if let Some(prev) = prev_end {
                assert_eq!(start, prev, "gap or overlap at {at}");
            }
            total += end - start;
            prev_end = Some(end);
            at += duration;
        }
        assert_eq!(total, frame_at(at, rate));
    }

    #[test]
    fn negative_times_map_to_frame_zero() {
        assert_eq!(frame_at(-1.0, 48_000), 0);
        assert_eq!(frame_span(0.0, 0.5, 48_000), (0, 24_000));
    }
}
