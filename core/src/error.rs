use thiserror::Error;

#[derive(Debug, Error)]
pub enum SonalinkError {
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("payload of {size} bytes exceeds profile capacity of {capacity} bytes")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("capture source unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("playback sink unavailable: {0}")]
    PlaybackUnavailable(String),

    #[error("invalid CRC generator: length minus one must be divisible by eight")]
    InvalidGenerator,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, SonalinkError>;
