use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Network-related errors
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Network timeout")]
    Timeout,

    #[error("Line exceeds the maximum length")]
    LineTooLong,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("IO error: {0}")]
    IoError(String),
}

pub type NetworkResult<T> = Result<T, NetworkError>;

impl From<std::io::Error> for NetworkError {
    fn from(error: std::io::Error) -> Self {
        NetworkError::IoError(error.to_string())
    }
}

impl From<LinesCodecError> for NetworkError {
    fn from(error: LinesCodecError) -> Self {
        match error {
            LinesCodecError::MaxLineLengthExceeded => NetworkError::LineTooLong,
            LinesCodecError::Io(e) => NetworkError::from(e),
        }
    }
}

impl From<tokio::time::error::Elapsed> for NetworkError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        NetworkError::Timeout
    }
}
