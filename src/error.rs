//! Crate-wide error type shared by the supplier stack, the audio pipeline,
//! and the playback coordinator.

use thiserror::Error;

/// Failure kinds surfaced by the playback engine.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("invalid argument")]
    BadInput,
    #[error("object not initialized")]
    NoInit,
    #[error("index out of range")]
    BadIndex,
    #[error("out of memory")]
    OutOfMemory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation timed out")]
    TimedOut,
    #[error("end of stream")]
    EndOfStream,
    #[error("no suitable handler for media")]
    NoHandler,
    #[error("malformed media format")]
    BadFormat,
    #[error("operation not supported")]
    NotSupported,
    #[error("entry not found")]
    EntryNotFound,
    #[error("decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

impl From<symphonia::core::errors::Error> for PlayerError {
    fn from(error: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error;
        match error {
            Error::IoError(io) => {
                if io.kind() == std::io::ErrorKind::UnexpectedEof {
                    PlayerError::EndOfStream
                } else {
                    PlayerError::Io(io)
                }
            }
            Error::DecodeError(message) => PlayerError::Decode(message.to_string()),
            Error::SeekError(_) => PlayerError::EntryNotFound,
            Error::Unsupported(_) => PlayerError::NotSupported,
            Error::LimitError(message) => PlayerError::Decode(message.to_string()),
            Error::ResetRequired => PlayerError::Decode("decoder reset required".to_string()),
        }
    }
}
