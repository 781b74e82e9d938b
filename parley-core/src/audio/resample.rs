//! Sample-rate conversion.
//!
//! Two converters live here:
//!
//! - [`RateConverter`]: streaming rubato `FastFixedIn` used by the capture
//!   graph to bring device-rate microphone audio down to the 16 kHz wire rate.
//!   Passthrough (no rubato session) when the rates already match.
//! - [`resample_to_len`]: one-shot linear interpolation used by the output
//!   device when it cannot open at the inbound chunk rate. Each chunk is
//!   stretched to exactly the frame span the timeline gives it, so adjacent
//!   chunks neither overlap nor leave a gap.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{ParleyError, Result};

/// Converts f32 mono audio from one fixed sample rate to another, streaming.
pub struct RateConverter {
    /// `None` when source rate == target rate.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    scratch_out: Vec<f32>,
}

impl RateConverter {
    /// # Errors
    /// `ParleyError::AudioStream` if rubato rejects the ratio or chunk size.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                scratch_out: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| ParleyError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        tracing::info!(source_rate, target_rate, chunk_size, "capture resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            scratch_out: Vec::with_capacity(max_out * 2),
        })
    }

    /// Feed samples and return whatever converted output is ready (may be empty).
    ///
    /// The returned slice is valid until the next call.
    pub fn process(&mut self, samples: &[f32]) -> &[f32] {
        self.scratch_out.clear();
        let Some(ref mut resampler) = self.resampler else {
            self.scratch_out.extend_from_slice(samples);
            return &self.scratch_out;
        };

        self.input_buf.extend_from_slice(samples);
        let mut consumed = 0;
        while self.input_buf.len() - consumed >= self.chunk_size {
            let input = &self.input_buf[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[input], &mut self.output_buf, None) {
                Ok((_, produced)) => {
                    self.scratch_out
                        .extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            consumed += self.chunk_size;
        }
        self.input_buf.drain(..consumed);
        &self.scratch_out
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Stretch `samples` to exactly `out_len` samples by linear interpolation.
///
/// Used when the output length is fixed by the device timeline rather than
/// by the rate ratio alone.
pub fn resample_to_len(samples: &[f32], out_len: usize) -> Vec<f32> {
    if samples.is_empty() {
        return vec![0.0; out_len];
    }
    if out_len == samples.len() {
        return samples.to_vec();
    }
    let step = samples.len() as f64 / out_len.max(1) as f64;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}
