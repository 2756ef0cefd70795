use serde::{Deserialize, Serialize};

/// Lifecycle state of one file upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadStatus {
    Queued,
    Uploading,
    Paused,
    Error,
    Canceled,
    Done,
    /// Restored after a restart; waiting for the user to reselect the file.
    AwaitingFile,
}

impl UploadStatus {
    /// Returns `true` for states that never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Canceled)
    }

    /// Returns `true` for states whose progress depends on a live file handle.
    pub fn needs_file(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Uploading | Self::Paused | Self::Error
        )
    }

    /// Human-readable label for progress displays.
    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Uploading => "Uploading",
            Self::Paused => "Paused",
            Self::Error => "Failed",
            Self::Canceled => "Canceled",
            Self::Done => "Completed",
            Self::AwaitingFile => "Waiting for file",
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
