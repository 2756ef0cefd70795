//! In-memory upload records and their read projection.

use std::sync::Arc;

use partwise_protocol::UploadStatus;
use partwise_transfer::{Chunk, FileSource, Fingerprint, SpeedCalculator};
use serde::Serialize;

/// Live handle to the file bytes of an upload.
#[derive(Debug, Clone)]
pub enum FileSlot {
    Attached(Arc<dyn FileSource>),
    /// No handle: restored from disk, or the handle was lost.
    Missing,
}

impl FileSlot {
    pub fn file(&self) -> Option<&Arc<dyn FileSource>> {
        match self {
            Self::Attached(file) => Some(file),
            Self::Missing => None,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Attached(_))
    }
}

/// One file in the upload queue.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub last_modified: Option<i64>,
    pub mime_type: String,
    pub status: UploadStatus,
    /// Whole percent, 0 to 100.
    pub progress: u8,
    /// Bytes of confirmed chunks only.
    pub uploaded_bytes: u64,
    /// Backend multipart session id, set once initiated.
    pub upload_id: Option<String>,
    pub chunk_size: u64,
    pub chunks: Vec<Chunk>,
    pub error: Option<String>,
    /// Final object location, set when done.
    pub location: Option<String>,
    /// Finalization in flight.
    pub completing: bool,
    pub file: FileSlot,
    /// Id of the session run allowed to report updates; 0 when none is.
    pub(crate) run: u64,
    /// Bytes of the current part attempt not yet confirmed.
    pub(crate) in_flight: u64,
}

impl UploadRecord {
    /// Creates a queued record for a newly selected file.
    pub fn new(id: String, file: Arc<dyn FileSource>, chunk_size: u64) -> Self {
        Self {
            id,
            name: file.name().to_string(),
            size: file.size(),
            last_modified: file.last_modified(),
            mime_type: file.mime_type().to_string(),
            status: UploadStatus::Queued,
            progress: 0,
            uploaded_bytes: 0,
            upload_id: None,
            chunk_size,
            chunks: Vec::new(),
            error: None,
            location: None,
            completing: false,
            file: FileSlot::Attached(file),
            run: 0,
            in_flight: 0,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            name: self.name.clone(),
            size: self.size,
            last_modified: self.last_modified,
        }
    }

    pub fn has_file(&self) -> bool {
        self.file.is_attached()
    }

    /// Recomputes confirmed bytes from the chunks and raises the percentage.
    ///
    /// Progress never decreases; bytes of a failed attempt are simply not
    /// counted again.
    pub(crate) fn refresh_progress(&mut self) {
        self.uploaded_bytes = partwise_transfer::uploaded_bytes(&self.chunks);
        let pct = percent(self.uploaded_bytes + self.in_flight, self.size);
        self.progress = self.progress.max(pct);
    }

    /// Finalization is in flight or about to start: every part of an
    /// initiated upload is confirmed.
    pub fn finalizing(&self) -> bool {
        self.completing
            || (self.status == UploadStatus::Uploading
                && self.upload_id.is_some()
                && self.chunks.iter().all(|c| c.uploaded))
    }

    pub fn can_pause(&self) -> bool {
        !self.finalizing()
            && matches!(self.status, UploadStatus::Uploading | UploadStatus::Queued)
    }

    pub fn can_resume(&self) -> bool {
        !self.completing
            && matches!(self.status, UploadStatus::Paused | UploadStatus::Error)
            && self.has_file()
    }

    pub fn can_cancel(&self) -> bool {
        !self.completing && !self.status.is_terminal()
    }

    /// The file must be selected again before this upload can continue.
    pub fn can_recover(&self) -> bool {
        self.status == UploadStatus::AwaitingFile
            || (self.status.needs_file() && !self.has_file())
    }

    /// Read projection for displays.
    pub fn view(&self, speed: Option<&SpeedCalculator>) -> UploadView {
        let (bytes_per_second, eta_secs) = match (self.status, speed) {
            (UploadStatus::Uploading, Some(calc)) => {
                let sent = self.uploaded_bytes + self.in_flight;
                let eta = calc
                    .eta(self.size.saturating_sub(sent))
                    .map(|d| d.as_secs());
                (calc.bytes_per_second(), eta)
            }
            _ => (0.0, None),
        };

        UploadView {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            status: self.status,
            label: self.status.label(),
            progress: self.progress,
            uploaded_bytes: self.uploaded_bytes,
            error: self.error.clone(),
            location: self.location.clone(),
            completing: self.completing,
            bytes_per_second,
            eta_secs,
            can_pause: self.can_pause(),
            can_resume: self.can_resume(),
            can_cancel: self.can_cancel(),
            can_recover: self.can_recover(),
        }
    }
}

/// Whole percentage of `done` over `total`, clamped to 100.
pub(crate) fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = u128::from(done.min(total)) * 100 / u128::from(total);
    pct as u8
}

/// Snapshot of one upload, as shown to users.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadView {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub status: UploadStatus,
    pub label: &'static str,
    pub progress: u8,
    pub uploaded_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub completing: bool,
    pub bytes_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    pub can_pause: bool,
    pub can_resume: bool,
    pub can_cancel: bool,
    pub can_recover: bool,
}
