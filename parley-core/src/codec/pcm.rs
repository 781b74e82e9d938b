//! f32 ⇄ base64 i16 LE conversions.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use super::{pcm_mime_type, DecodedChunk, EncodedBlock, CAPTURE_SAMPLE_RATE};
use crate::error::DecodeError;

const BYTES_PER_SAMPLE: usize = 2;

/// Map one float sample onto the signed 16-bit range.
///
/// Scales by 32768 and clamps to `[-32768, 32767]`, so full-scale positive
/// input saturates at `i16::MAX` instead of wrapping.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (s * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode a 16 kHz capture block into a wire block.
pub fn encode(samples: &[f32]) -> EncodedBlock {
    PcmEncoder::new(CAPTURE_SAMPLE_RATE).encode(samples)
}

/// Reusable encoder for the capture hot path.
///
/// Keeps its byte scratch buffer between calls so steady-state encoding only
/// allocates the outgoing base64 string.
#[derive(Debug)]
pub struct PcmEncoder {
    mime_type: String,
    scratch: Vec<u8>,
}

impl PcmEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mime_type: pcm_mime_type(sample_rate),
            scratch: Vec::new(),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn encode(&mut self, samples: &[f32]) -> EncodedBlock {
        self.scratch.clear();
        self.scratch.reserve(samples.len() * BYTES_PER_SAMPLE);
        for &s in samples {
            self.scratch.extend_from_slice(&f32_to_i16(s).to_le_bytes());
        }
        EncodedBlock {
            mime_type: self.mime_type.clone(),
            data: BASE64.encode(&self.scratch),
        }
    }
}

/// Decode a base64 payload into raw bytes.
///
/// # Errors
/// `DecodeError::Base64` when the input contains non-base64 characters or bad padding.
pub fn decode_bytes(data: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(BASE64.decode(data.trim())?)
}

/// Reinterpret interleaved i16 LE bytes as a planar playable chunk.
///
/// # Errors
/// - `DecodeError::InvalidFormat` for a zero channel count or sample rate.
/// - `DecodeError::MisalignedLength` when the byte count does not divide into
///   whole frames. Trailing partial samples are never truncated silently.
pub fn decode_audio_data(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<DecodedChunk, DecodeError> {
    if channel_count == 0 {
        return Err(DecodeError::InvalidFormat("channel count must be > 0".into()));
    }
    if sample_rate == 0 {
        return Err(DecodeError::InvalidFormat("sample rate must be > 0".into()));
    }
    let frame_bytes = BYTES_PER_SAMPLE * channel_count;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::MisalignedLength {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let frames = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (ch, sample) in frame.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
            channels[ch].push(i16_to_f32(i16::from_le_bytes([sample[0], sample[1]])));
        }
    }
    Ok(DecodedChunk::new(channels, sample_rate))
}

/// base64 → chunk in one step.
pub fn decode_chunk(
    data: &str,
    sample_rate: u32,
    channel_count: usize,
) -> Result<DecodedChunk, DecodeError> {
    let bytes = decode_bytes(data)?;
    decode_audio_data(&bytes, sample_rate, channel_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PLAYBACK_SAMPLE_RATE;
    use approx::assert_abs_diff_eq;

    const STEP: f32 = 1.0 / 32768.0;

    #[test]
    fn full_scale_does_not_wrap() {
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), i16::MIN);
        assert_eq!(f32_to_i16(1.7), i16::MAX);
        assert_eq!(f32_to_i16(-3.0), i16::MIN);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(f32::NAN), 0);
    }

    #[test]
    fn encode_is_little_endian() {
        let block = encode(&[0.5, -0.5]);
        assert_eq!(block.mime_type, "audio/pcm;rate=16000");
        let bytes = decode_bytes(&block.data).expect("valid base64");
        // 0.5 * 32768 = 16384 = 0x4000, -16384 = 0xC000
        assert_eq!(bytes, vec![0x00, 0x40, 0x00, 0xC0]);
    }

    #[test]
    fn round_trip_within_one_quantization_step() {
        let samples: Vec<f32> = (0..1024)
            .map(|i| ((i as f32) * 0.037).sin() * 0.999)
            .chain([1.0, -1.0, 0.0, STEP, -STEP, 0.49999])
            .collect();
        let block = encode(&samples);
        let bytes = decode_bytes(&block.data).expect("valid base64");
        let chunk = decode_audio_data(&bytes, CAPTURE_SAMPLE_RATE, 1).expect("aligned");
        let decoded = chunk.channel(0).expect("mono channel");
        assert_eq!(decoded.len(), samples.len());
        for (orig, back) in samples.iter().zip(decoded) {
            assert_abs_diff_eq!(*orig, *back, epsilon = STEP + f32::EPSILON);
        }
    }

    #[test]
    fn encoder_reuses_scratch_between_blocks() {
        let mut enc = PcmEncoder::new(16_000);
        let a = enc.encode(&[0.25; 256]);
        let b = enc.encode(&[0.25; 4]);
        assert_eq!(decode_bytes(&a.data).expect("a").len(), 512);
        assert_eq!(decode_bytes(&b.data).expect("b").len(), 8);
    }

    #[test]
    fn empty_block_encodes_to_empty_payload() {
        let block = encode(&[]);
        assert!(block.data.is_empty());
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = decode_bytes("AAAA*AAA").expect_err("'*' is not base64");
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn odd_byte_count_is_rejected_not_truncated() {
        let err = decode_audio_data(&[0, 1, 2], PLAYBACK_SAMPLE_RATE, 1).expect_err("misaligned");
        assert!(matches!(
            err,
            DecodeError::MisalignedLength {
                len: 3,
                frame_bytes: 2
            }
        ));
    }

    #[test]
    fn stereo_requires_whole_frames() {
        // 6 bytes = 3 samples, not a whole number of stereo frames.
        let err = decode_audio_data(&[0; 6], PLAYBACK_SAMPLE_RATE, 2).expect_err("misaligned");
        assert!(matches!(err, DecodeError::MisalignedLength { frame_bytes: 4, .. }));
    }

    #[test]
    fn zero_channels_is_invalid() {
        let err = decode_audio_data(&[0; 4], PLAYBACK_SAMPLE_RATE, 0).expect_err("invalid");
        assert!(matches!(err, DecodeError::InvalidFormat(_)));
    }

    #[test]
    fn stereo_is_deinterleaved_per_channel() {
        // L0=16384, R0=-16384, L1=8192, R1=0
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0x00, 0x20, 0x00, 0x00];
        let chunk = decode_audio_data(&bytes, 24_000, 2).expect("aligned");
        assert_eq!(chunk.channel(0), Some(&[0.5f32, 0.25][..]));
        assert_eq!(chunk.channel(1), Some(&[-0.5f32, 0.0][..]));
        assert_eq!(chunk.frames(), 2);
        assert_abs_diff_eq!(chunk.duration(), 2.0 / 24_000.0, epsilon = 1e-12);
    }

    #[test]
    fn decode_chunk_combines_both_steps() {
        let block = encode(&[0.0; 240]);
        let chunk = decode_chunk(&block.data, PLAYBACK_SAMPLE_RATE, 1).expect("valid");
        assert_abs_diff_eq!(chunk.duration(), 0.01, epsilon = 1e-12);
    }
}
