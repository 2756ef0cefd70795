//! Durable queue state.
//!
//! Only unfinished uploads are written, without file handles. After a
//! restart every upload that needs its bytes waits in `awaiting-file`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use partwise_protocol::UploadStatus;
use partwise_transfer::Chunk;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::UploadError;
use crate::record::{FileSlot, UploadRecord};

/// Current document version.
pub const STATE_VERSION: u32 = 1;

/// An upload record as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    pub mime_type: String,
    pub status: UploadStatus,
    pub progress: u8,
    pub uploaded_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub chunk_size: u64,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set while the completion request was outstanding.
    #[serde(default)]
    pub completing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl PersistedRecord {
    /// Returns `None` for done and canceled records, which are not kept.
    pub fn from_record(record: &UploadRecord) -> Option<Self> {
        if record.status.is_terminal() {
            return None;
        }
        Some(Self {
            id: record.id.clone(),
            name: record.name.clone(),
            size: record.size,
            last_modified: record.last_modified,
            mime_type: record.mime_type.clone(),
            status: record.status,
            progress: record.progress,
            uploaded_bytes: record.uploaded_bytes,
            upload_id: record.upload_id.clone(),
            chunk_size: record.chunk_size,
            chunks: record.chunks.clone(),
            error: record.error.clone(),
            completing: record.completing,
            location: record.location.clone(),
        })
    }

    /// Rebuilds an in-memory record with no file attached.
    ///
    /// An interrupted completion is not in flight any more, so `completing`
    /// is cleared and the upload finishes again once its file is back.
    pub fn into_record(self) -> UploadRecord {
        let status = if self.status.needs_file() {
            UploadStatus::AwaitingFile
        } else {
            self.status
        };
        UploadRecord {
            id: self.id,
            name: self.name,
            size: self.size,
            last_modified: self.last_modified,
            mime_type: self.mime_type,
            status,
            progress: self.progress.min(100),
            uploaded_bytes: partwise_transfer::uploaded_bytes(&self.chunks),
            upload_id: self.upload_id,
            chunk_size: self.chunk_size,
            chunks: self.chunks,
            error: self.error,
            location: self.location,
            completing: false,
            file: FileSlot::Missing,
            run: 0,
            in_flight: 0,
        }
    }
}

/// The state document: `{version, savedAt, uploads}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub uploads: Vec<PersistedRecord>,
}

impl PersistedState {
    /// Captures every unfinished record.
    pub fn capture(records: &[UploadRecord]) -> Self {
        Self {
            version: STATE_VERSION,
            saved_at: Utc::now(),
            uploads: records
                .iter()
                .filter_map(PersistedRecord::from_record)
                .collect(),
        }
    }

    pub fn into_records(self) -> Vec<UploadRecord> {
        self.uploads
            .into_iter()
            .map(PersistedRecord::into_record)
            .collect()
    }
}

/// Storage for the state document.
pub trait StateStore: Send + Sync {
    /// Returns `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<PersistedState>, UploadError>;

    fn save(&self, state: &PersistedState) -> Result<(), UploadError>;
}

/// Stores the document as pretty JSON in one file.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash never leaves a half-written document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<PersistedState>, UploadError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let state: PersistedState = serde_json::from_str(&data)?;
        if state.version > STATE_VERSION {
            return Err(UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported state version {}", state.version),
            )));
        }
        debug!("loaded {} upload(s) from {:?}", state.uploads.len(), self.path);
        Ok(Some(state))
    }

    fn save(&self, state: &PersistedState) -> Result<(), UploadError> {
        let json = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("persisted {} upload(s) to {:?}", state.uploads.len(), self.path);
        Ok(())
    }
}

/// Keeps the document in memory. For tests and embedders without a disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with a previously saved document.
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// Returns the last saved document.
    pub fn saved(&self) -> Option<PersistedState> {
        self.state.lock().ok().and_then(|s| s.clone())
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedState>, UploadError> {
        Ok(self.saved())
    }

    fn save(&self, state: &PersistedState) -> Result<(), UploadError> {
        if let Ok(mut slot) = self.state.lock() {
            *slot = Some(state.clone());
        }
        Ok(())
    }
}

/// Returns the default state file path.
pub fn default_state_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("partwise").join("uploads.json"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
