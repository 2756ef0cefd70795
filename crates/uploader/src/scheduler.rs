//! Queue state and promotion.
//!
//! [`QueueState`] owns every upload record and applies user actions and
//! session updates to them. It performs no I/O: the manager runs it on a
//! single task and acts on what it returns.

use std::sync::Arc;

use partwise_protocol::UploadStatus;
use partwise_transfer::FileSource;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::record::{FileSlot, UploadRecord};
use crate::session::{SessionMessage, SessionStart, SessionUpdate};

/// Work the manager should start after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start(String),
}

/// Returns the queued records to start, oldest first, without exceeding
/// `max_parallel` uploading records.
pub fn next_actions(records: &[UploadRecord], max_parallel: usize) -> Vec<Action> {
    let running = records
        .iter()
        .filter(|r| r.status == UploadStatus::Uploading)
        .count();
    records
        .iter()
        .filter(|r| r.status == UploadStatus::Queued && r.has_file())
        .take(max_parallel.saturating_sub(running))
        .map(|r| Action::Start(r.id.clone()))
        .collect()
}

/// Why a file was refused at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RejectReason {
    TooLarge { size: u64, max: u64 },
    TooMany { max: usize },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { size, max } => {
                write!(f, "file is {size} bytes; the limit is {max} bytes")
            }
            Self::TooMany { max } => write!(f, "queue is full ({max} uploads)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub name: String,
    pub reason: RejectReason,
}

/// Outcome of [`QueueState::enqueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    /// Ids of newly created records.
    pub accepted: Vec<String>,
    /// Ids of restored records that got their file back.
    pub reattached: Vec<String>,
    pub rejected: Vec<Rejection>,
}

/// Side effect requested by [`QueueState::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Discard the backend session with this id.
    Abort(String),
}

/// Result of applying a session update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Durable state changed.
    pub persist: bool,
    pub effects: Vec<Effect>,
}

impl Applied {
    fn persist() -> Self {
        Self {
            persist: true,
            effects: Vec::new(),
        }
    }

    fn transient() -> Self {
        Self::default()
    }
}

/// Every upload record, in enqueue order.
#[derive(Debug)]
pub struct QueueState {
    records: Vec<UploadRecord>,
    next_run: u64,
    max_parallel: usize,
    max_files: usize,
    max_file_size: u64,
    default_chunk_size: u64,
}

impl QueueState {
    pub fn new(config: &UploaderConfig) -> Self {
        Self::with_records(config, Vec::new())
    }

    /// Starts from records restored from disk.
    pub fn with_records(config: &UploaderConfig, records: Vec<UploadRecord>) -> Self {
        Self {
            records,
            next_run: 1,
            max_parallel: config.max_parallel.max(1),
            max_files: config.max_files,
            max_file_size: config.max_file_size,
            default_chunk_size: config.default_chunk_size,
        }
    }

    pub fn records(&self) -> &[UploadRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&UploadRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut UploadRecord, UploadError> {
        self.records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| UploadError::NotFound(id.to_string()))
    }

    pub fn next_actions(&self) -> Vec<Action> {
        next_actions(&self.records, self.max_parallel)
    }

    /// Uploads still queued or in flight.
    pub fn pending(&self) -> usize {
        self.records
            .iter()
            .filter(|r| {
                r.status == UploadStatus::Uploading
                    || (r.status == UploadStatus::Queued && r.has_file())
            })
            .count()
    }

    /// Adds files to the queue.
    ///
    /// A file matching a restored `awaiting-file` record is attached to it
    /// instead of creating a new one. Refused files do not stop the rest.
    pub fn enqueue(&mut self, files: Vec<Arc<dyn FileSource>>) -> EnqueueReport {
        let mut report = EnqueueReport::default();

        for file in files {
            let fingerprint = file.fingerprint();
            if fingerprint.size > self.max_file_size {
                report.rejected.push(Rejection {
                    name: fingerprint.name,
                    reason: RejectReason::TooLarge {
                        size: file.size(),
                        max: self.max_file_size,
                    },
                });
                continue;
            }

            if let Some(record) = self.records.iter_mut().find(|r| {
                r.status == UploadStatus::AwaitingFile && r.fingerprint().matches(&fingerprint)
            }) {
                info!(upload = %record.id, file = %record.name, "file re-attached");
                record.file = FileSlot::Attached(file);
                record.status = UploadStatus::Queued;
                record.error = None;
                report.reattached.push(record.id.clone());
                continue;
            }

            let active = self
                .records
                .iter()
                .filter(|r| !r.status.is_terminal())
                .count();
            if active >= self.max_files {
                report.rejected.push(Rejection {
                    name: fingerprint.name,
                    reason: RejectReason::TooMany {
                        max: self.max_files,
                    },
                });
                continue;
            }

            let id = uuid::Uuid::new_v4().to_string();
            debug!(upload = %id, file = %fingerprint.name, size = fingerprint.size, "file queued");
            self.records
                .push(UploadRecord::new(id.clone(), file, self.default_chunk_size));
            report.accepted.push(id);
        }

        report
    }

    /// Pausing is refused once every part is confirmed, since the session
    /// may already be completing the upload.
    pub fn pause(&mut self, id: &str) -> Result<(), UploadError> {
        let record = self.get_mut(id)?;
        if record.finalizing() {
            return Err(UploadError::Busy);
        }
        match record.status {
            UploadStatus::Uploading | UploadStatus::Queued => {
                record.status = UploadStatus::Paused;
                record.in_flight = 0;
                Ok(())
            }
            status => Err(UploadError::InvalidState {
                action: "pause",
                status,
            }),
        }
    }

    pub fn resume(&mut self, id: &str) -> Result<(), UploadError> {
        let record = self.get_mut(id)?;
        if record.completing {
            return Err(UploadError::Busy);
        }
        match record.status {
            UploadStatus::Paused | UploadStatus::Error | UploadStatus::Queued => {
                if !record.has_file() {
                    return Err(UploadError::FileUnavailable);
                }
                record.status = UploadStatus::Queued;
                record.error = None;
                Ok(())
            }
            UploadStatus::AwaitingFile => Err(UploadError::FileUnavailable),
            status => Err(UploadError::InvalidState {
                action: "resume",
                status,
            }),
        }
    }

    /// Cancels an upload and returns its backend session id, if any.
    pub fn cancel(&mut self, id: &str) -> Result<Option<String>, UploadError> {
        let record = self.get_mut(id)?;
        if record.completing {
            return Err(UploadError::Busy);
        }
        if record.status.is_terminal() {
            return Err(UploadError::InvalidState {
                action: "cancel",
                status: record.status,
            });
        }
        record.status = UploadStatus::Canceled;
        record.in_flight = 0;
        record.file = FileSlot::Missing;
        Ok(record.upload_id.clone())
    }

    /// Attaches a reselected file to an upload that lost its handle.
    ///
    /// Name and size must match; the modification time may differ.
    pub fn recover(&mut self, id: &str, file: Arc<dyn FileSource>) -> Result<(), UploadError> {
        let record = self.get_mut(id)?;
        if !record.can_recover() {
            return Err(UploadError::InvalidState {
                action: "recover",
                status: record.status,
            });
        }
        let fingerprint = file.fingerprint();
        if !record.fingerprint().matches_loosely(&fingerprint) {
            return Err(UploadError::FileMismatch {
                expected_name: record.name.clone(),
                expected_size: record.size,
            });
        }

        info!(upload = %record.id, file = %record.name, "file recovered");
        record.last_modified = fingerprint.last_modified;
        record.file = FileSlot::Attached(file);
        if record.status == UploadStatus::AwaitingFile {
            record.status = UploadStatus::Queued;
            record.error = None;
        }
        Ok(())
    }

    /// Marks a queued record as uploading and returns what its session needs.
    pub fn start(&mut self, id: &str) -> Option<SessionStart> {
        let run = self.next_run;
        let record = self.records.iter_mut().find(|r| r.id == id)?;
        if record.status != UploadStatus::Queued {
            return None;
        }
        let file = record.file.file()?.clone();

        self.next_run += 1;
        record.status = UploadStatus::Uploading;
        record.error = None;
        record.run = run;
        record.in_flight = 0;
        Some(SessionStart {
            id: record.id.clone(),
            run,
            file,
            upload_id: record.upload_id.clone(),
            chunk_size: record.chunk_size,
            chunks: record.chunks.clone(),
        })
    }

    /// Applies a session update. Returns `None` if it was discarded.
    pub fn apply(&mut self, msg: SessionMessage) -> Option<Applied> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == msg.id && r.run == msg.run)?;
        let uploading = record.status == UploadStatus::Uploading;

        match msg.update {
            SessionUpdate::Initiated {
                upload_id,
                chunk_size,
                chunks,
            } => {
                if record.status == UploadStatus::Canceled {
                    return Some(Applied {
                        persist: false,
                        effects: vec![Effect::Abort(upload_id)],
                    });
                }
                record.upload_id = Some(upload_id);
                record.chunk_size = chunk_size;
                record.chunks = chunks;
                record.in_flight = 0;
                record.refresh_progress();
                Some(Applied::persist())
            }
            SessionUpdate::PartProgress { sent, .. } if uploading => {
                record.in_flight = sent;
                record.refresh_progress();
                Some(Applied::transient())
            }
            SessionUpdate::PartUploaded { index, etag } if !record.status.is_terminal() => {
                let chunk = record.chunks.get_mut(index as usize)?;
                chunk.mark_uploaded(etag);
                record.in_flight = 0;
                record.refresh_progress();
                Some(Applied::persist())
            }
            SessionUpdate::Retrying { .. } if uploading => {
                record.in_flight = 0;
                Some(Applied::transient())
            }
            SessionUpdate::Completing if uploading => {
                record.completing = true;
                Some(Applied::transient())
            }
            SessionUpdate::Finished { location } => {
                record.status = UploadStatus::Done;
                record.location = Some(location);
                record.completing = false;
                record.error = None;
                record.in_flight = 0;
                record.uploaded_bytes = record.size;
                record.progress = 100;
                record.file = FileSlot::Missing;
                Some(Applied::persist())
            }
            SessionUpdate::Failed { error } if uploading => {
                record.status = UploadStatus::Error;
                record.error = Some(error);
                record.completing = false;
                record.in_flight = 0;
                Some(Applied::persist())
            }
            _ => None,
        }
    }

    /// Drops done and canceled records; returns their ids.
    pub fn clear_finished(&mut self) -> Vec<String> {
        let removed: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.status.is_terminal())
            .map(|r| r.id.clone())
            .collect();
        self.records.retain(|r| !r.status.is_terminal());
        removed
    }
}
