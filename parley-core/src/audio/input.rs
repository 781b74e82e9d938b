//! Microphone input via cpal.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig, SupportedStreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::{
    buffering::AudioProducer,
    capture::InputDevice,
    error::{ParleyError, Result},
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;

/// cpal-backed [`InputDevice`]. Holds the stream only while acquired.
///
/// Not `Send` while acquired; see [`crate::audio`].
pub struct CpalInput {
    preferred_device: Option<String>,
    #[cfg(feature = "audio-cpal")]
    stream: Option<Stream>,
    lost: Arc<AtomicBool>,
    /// Samples the callback could not fit into the ring.
    overruns: Arc<AtomicUsize>,
}

impl CpalInput {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            #[cfg(feature = "audio-cpal")]
            stream: None,
            lost: Arc::new(AtomicBool::new(false)),
            overruns: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl InputDevice for CpalInput {
    fn acquire(
        &mut self,
        producer: AudioProducer,
        recording: Arc<AtomicBool>,
        preferred_rate: u32,
    ) -> Result<u32> {
        use crate::audio::device::{is_loopback_like_name, select_device, Direction};

        self.release();
        self.lost.store(false, Ordering::Release);

        let device = select_device(Direction::Input, self.preferred_device.as_deref())
            .ok_or(ParleyError::NoDefaultInputDevice)?;
        let name = device.name().unwrap_or_default();
        if is_loopback_like_name(&name) {
            warn!(device = name.as_str(), "input device looks like a loopback source");
        }
        info!(device = name.as_str(), "opening input device");

        let supported = choose_config(&device, preferred_rate)?;
        let sample_rate = supported.sample_rate().0;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(sample_rate, channels = config.channels, format = ?supported.sample_format(), "input config selected");

        let flags = CallbackFlags {
            recording,
            lost: Arc::clone(&self.lost),
            overruns: Arc::clone(&self.overruns),
        };
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, producer, flags),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, producer, flags),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, producer, flags),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, producer, flags),
            SampleFormat::U8 => build_stream::<u8>(&device, &config, producer, flags),
            fmt => {
                return Err(ParleyError::Acquisition(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| ParleyError::Acquisition(e.to_string()))?;
        self.stream = Some(stream);
        Ok(sample_rate)
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            let overruns = self.overruns.swap(0, Ordering::Relaxed);
            if overruns > 0 {
                warn!(dropped = overruns, "capture ring overflowed while recording");
            }
            info!("input device released");
        }
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

/// Prefer a config that runs natively at `rate` so no resampling is needed.
#[cfg(feature = "audio-cpal")]
fn choose_config(device: &cpal::Device, rate: u32) -> Result<SupportedStreamConfig> {
    let wanted = SampleRate(rate);
    if let Ok(ranges) = device.supported_input_configs() {
        let mut native: Vec<_> = ranges
            .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
            .filter(|r| {
                matches!(
                    r.sample_format(),
                    SampleFormat::F32 | SampleFormat::I16 | SampleFormat::I32 | SampleFormat::U16 | SampleFormat::U8
                )
            })
            .collect();
        native.sort_by_key(|r| (r.channels() != 1, r.sample_format() != SampleFormat::F32));
        if let Some(range) = native.into_iter().next() {
            return Ok(range.with_sample_rate(wanted));
        }
    }
    device
        .default_input_config()
        .map_err(|e| ParleyError::Acquisition(e.to_string()))
}

/// Atomics shared between the input callback and `CpalInput`.
#[cfg(feature = "audio-cpal")]
struct CallbackFlags {
    recording: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
    overruns: Arc<AtomicUsize>,
}

/// Mono-mix interleaved frames and push them into the ring while recording.
#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    flags: CallbackFlags,
) -> Result<Stream>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let mut mono: Vec<f32> = Vec::with_capacity(8192);
    let CallbackFlags {
        recording,
        lost,
        overruns,
    } = flags;

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !recording.load(Ordering::Acquire) {
                    return;
                }
                mono.clear();
                mono.extend(data.chunks_exact(channels).map(|frame| {
                    frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
                }));
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    overruns.fetch_add(mono.len() - written, Ordering::Relaxed);
                }
            },
            move |err| {
                error!("input stream error: {err}");
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    lost.store(true, Ordering::Release);
                }
            },
            None,
        )
        .map_err(|e| ParleyError::Acquisition(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl InputDevice for CpalInput {
    fn acquire(
        &mut self,
        _producer: AudioProducer,
        _recording: Arc<AtomicBool>,
        _preferred_rate: u32,
    ) -> Result<u32> {
        let _ = &self.preferred_device;
        Err(ParleyError::Acquisition(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn release(&mut self) {}

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}
