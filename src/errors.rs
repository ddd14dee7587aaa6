use thiserror;

use crate::session::SessionState;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can end a transfer.
///
/// Each variant names the stage that failed. Apart from [`Error::AbortFailure`], all of them are
/// fatal: by the time one reaches the caller the backend upload (if one was ever opened) has
/// been aborted.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid transfer request: {0}")]
    InvalidRequest(String),

    #[error("source unavailable: {url}")]
    SourceUnavailable {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("source stream failed after {bytes_read} bytes")]
    SourceReadFailure {
        bytes_read: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open multipart upload")]
    SessionOpenFailure(#[source] ferry_objectstore::Error),

    #[error("upload of part {part_number} failed")]
    PartUploadFailure {
        part_number: i32,
        #[source]
        source: ferry_objectstore::Error,
    },

    #[error("part {part_number} is invalid: {reason}")]
    InvalidPart {
        part_number: i32,
        reason: &'static str,
    },

    #[error("failed to complete multipart upload")]
    FinalizeFailure(#[source] ferry_objectstore::Error),

    #[error("failed to upload empty object")]
    DirectUploadFailure(#[source] ferry_objectstore::Error),

    #[error("cannot {operation} a session in state {state:?}")]
    InvalidSessionState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("failed to abort multipart upload {upload_id}")]
    AbortFailure {
        upload_id: String,
        #[source]
        source: ferry_objectstore::Error,
    },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("failed to build http client")]
    HttpClientError(#[from] reqwest::Error),

    #[error("config deserialization error")]
    ConfigError(#[from] serde_yaml::Error),

    #[error("io error")]
    IOError(#[from] std::io::Error),
}

impl Error {
    /// The part number a part-level failure refers to.
    pub fn part_number(&self) -> Option<i32> {
        match self {
            Error::PartUploadFailure { part_number, .. } => Some(*part_number),
            Error::InvalidPart { part_number, .. } => Some(*part_number),
            _ => None,
        }
    }
}
