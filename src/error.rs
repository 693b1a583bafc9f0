use serde::{Deserialize, Serialize};

/// Recoverable faults reported by workers as tagged failure responses.
///
/// Values cross the process boundary, so they carry rendered messages rather
/// than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FetchError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("unexpected response: {0}")]
    ParseFailure(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
}

impl FetchError {
    pub(crate) fn unavailable(e: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable(e.to_string())
    }

    pub(crate) fn parse(e: impl std::fmt::Display) -> Self {
        Self::ParseFailure(e.to_string())
    }

    pub(crate) fn download(e: impl std::fmt::Display) -> Self {
        Self::DownloadFailed(e.to_string())
    }
}

/// Errors on the bridge wire.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("bridge i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode frame: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("stream ended inside a frame")]
    Truncated,
}
