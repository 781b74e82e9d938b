//! Linear PCM wire codec.
//!
//! The wire format is base64-encoded 16-bit little-endian signed PCM, tagged
//! with an `audio/pcm;rate=<hz>` MIME type. Everything here is a pure,
//! synchronous transform; only the inbound direction can fail.

pub mod pcm;

pub use pcm::{decode_audio_data, decode_bytes, decode_chunk, encode, PcmEncoder};

use serde::{Deserialize, Serialize};

/// Sample rate of outbound capture blocks (Hz).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate assumed for inbound chunks when the MIME hint carries none (Hz).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// One outbound wire unit: `{"mimeType": "audio/pcm;rate=16000", "data": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedBlock {
    pub mime_type: String,
    pub data: String,
}

impl EncodedBlock {
    /// Sample rate declared by the MIME type, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        parse_pcm_rate(&self.mime_type)
    }
}

/// MIME type for linear 16-bit PCM at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Extract the `rate=` parameter from an `audio/pcm` MIME hint.
///
/// Returns `None` for non-PCM types or a missing/unparseable rate.
pub fn parse_pcm_rate(mime: &str) -> Option<u32> {
    let mut parts = mime.split(';');
    let essence = parts.next()?.trim();
    if !essence.eq_ignore_ascii_case("audio/pcm") && !essence.eq_ignore_ascii_case("audio/l16") {
        return None;
    }
    parts
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, v)| v.trim().parse::<u32>().ok())
        .filter(|rate| *rate > 0)
}

/// Planar PCM reconstructed from inbound bytes, ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    /// One sample sequence per channel, all of equal length.
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl DecodedChunk {
    /// Build a chunk from planar channel data.
    ///
    /// All channels are truncated to the shortest one so the frame count is
    /// well defined.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for ch in &mut channels {
            ch.truncate(frames);
        }
        Self {
            channels,
            sample_rate,
        }
    }

    /// Single-channel convenience constructor.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// RMS over all channels.
    pub fn rms(&self) -> f32 {
        let total: usize = self.channels.iter().map(Vec::len).sum();
        if total == 0 {
            return 0.0;
        }
        let sum_sq: f32 = self
            .channels
            .iter()
            .flat_map(|ch| ch.iter())
            .map(|s| s * s)
            .sum();
        (sum_sq / total as f32).sqrt()
    }
}
