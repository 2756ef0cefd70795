//! Upload error types.

/// Failure of a single part attempt or backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transfer stalled")]
    Stalled,

    #[error("attempt timed out")]
    TimedOut,

    #[error("part stored without confirmation token")]
    MissingEtag,

    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// Returns `true` if another attempt may succeed.
    ///
    /// 403 is included because short-lived part URLs expire; the retry
    /// budget bounds it when the cause is a real authorization failure.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Stalled | Self::TimedOut | Self::MissingEtag => true,
            Self::Status { status, .. } => {
                matches!(status, 403 | 408 | 429) || (500..600).contains(status)
            }
            Self::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None if e.is_timeout() => Self::TimedOut,
            None => Self::Network(e.to_string()),
        }
    }
}

/// Errors produced by the upload coordinator.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("transfer error: {0}")]
    Transfer(#[from] partwise_transfer::TransferError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend admission control refused the file (quota, policy).
    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("missing upload session id")]
    MissingSession,

    #[error("backend returned no file location")]
    MissingLocation,

    #[error("not every part is confirmed")]
    Incomplete,

    #[error("file data unavailable; select the file again to resume")]
    FileUnavailable,

    /// Pause or cancel interrupted the work. Not a failure.
    #[error("interrupted")]
    Interrupted,

    #[error("upload not found: {0}")]
    NotFound(String),

    /// Finalization is in flight; controls are disabled.
    #[error("upload is completing")]
    Busy,

    #[error("cannot {action} an upload that is {status}")]
    InvalidState {
        action: &'static str,
        status: partwise_protocol::UploadStatus,
    },

    #[error("selected file does not match: expected {expected_name} ({expected_size} bytes)")]
    FileMismatch {
        expected_name: String,
        expected_size: u64,
    },

    #[error("upload manager is shut down")]
    Closed,
}

impl UploadError {
    /// Returns `true` if the failed part attempt should be retried.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// Returns `true` for user-driven interruption (pause, cancel).
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            Self::Interrupted | Self::Transport(TransportError::Cancelled)
        )
    }
}
