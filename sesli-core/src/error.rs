use thiserror::Error;

/// All errors produced by sesli-core.
#[derive(Debug, Error)]
pub enum SesliError {
    #[error("speech recognition or synthesis is not supported on this platform")]
    Unsupported,

    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("no microphone device is available")]
    NoMicrophone,

    #[error("voice mode start was cancelled before permission resolved")]
    Cancelled,

    #[error("voice session has been shut down")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, SesliError>;
