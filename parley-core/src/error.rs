use thiserror::Error;

/// Malformed inbound audio. The offending chunk is dropped; nothing else changes.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM payload of {len} bytes is not a multiple of the {frame_bytes}-byte frame")]
    MisalignedLength { len: usize, frame_bytes: usize },

    #[error("invalid PCM format: {0}")]
    InvalidFormat(String),
}

/// All errors produced by parley-core.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("input device acquisition failed: {0}")]
    Acquisition(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("playback device error: {0}")]
    Playback(String),

    #[error("malformed audio chunk: {0}")]
    Decode(#[from] DecodeError),

    #[error("session transport error: {0}")]
    Transport(String),

    #[error("engine thread has stopped")]
    EngineStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParleyError {
    /// Whether this error came from input device acquisition.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            ParleyError::Acquisition(_) | ParleyError::NoDefaultInputDevice
        )
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
