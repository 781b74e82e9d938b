//! Engine configuration (JSON file, camelCase keys, every field optional).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capture::CaptureConfig;
use crate::codec::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    /// Wire rate of outbound capture blocks (Hz). Default: 16000.
    pub input_sample_rate: u32,
    /// Rate assumed for inbound chunks without a rate in their MIME hint. Default: 24000.
    pub output_sample_rate: u32,
    /// Channel count of inbound PCM. Default: 1.
    pub output_channels: usize,
    /// Samples per outbound block. Default: 256.
    pub block_size: usize,
    /// Linear gain applied to the microphone before framing. Default: 1.0.
    pub input_gain: f32,
    /// Device frames per rubato call when the mic cannot run at the wire rate.
    pub resample_chunk: usize,
    /// Headroom added to the output clock so "now" is always still ahead of
    /// the render position (milliseconds). Default: 20.
    pub output_lead_ms: u32,
    /// Exact name of the input device to use; `None` = system default.
    pub preferred_input_device: Option<String>,
    /// Exact name of the output device to use; `None` = system default.
    pub preferred_output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: CAPTURE_SAMPLE_RATE,
            output_sample_rate: PLAYBACK_SAMPLE_RATE,
            output_channels: 1,
            block_size: 256,
            input_gain: 1.0,
            resample_chunk: 480,
            output_lead_ms: 20,
            preferred_input_device: None,
            preferred_output_device: None,
        }
    }
}

impl EngineConfig {
    /// Clamp every field into a usable range.
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        if !(8_000..=192_000).contains(&self.input_sample_rate) {
            self.input_sample_rate = defaults.input_sample_rate;
        }
        if !(8_000..=192_000).contains(&self.output_sample_rate) {
            self.output_sample_rate = defaults.output_sample_rate;
        }
        self.output_channels = self.output_channels.clamp(1, 8);
        self.block_size = self.block_size.clamp(64, 16_384);
        self.input_gain = if self.input_gain.is_finite() {
            self.input_gain.clamp(0.0, 16.0)
        } else {
            defaults.input_gain
        };
        self.resample_chunk = self.resample_chunk.clamp(64, 8_192);
        self.output_lead_ms = self.output_lead_ms.min(500);
        for name in [
            &mut self.preferred_input_device,
            &mut self.preferred_output_device,
        ] {
            if name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                *name = None;
            }
        }
    }

    /// Read a config file, falling back to defaults for a missing or
    /// unparseable file. The result is always normalized.
    pub fn load(path: &Path) -> Self {
        let mut config = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<EngineConfig>(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), "invalid engine config, using defaults: {e}");
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        config.normalize();
        config
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, json)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.input_sample_rate,
            block_size: self.block_size,
            gain: self.input_gain,
            resample_chunk: self.resample_chunk,
        }
    }
}
