use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::UNIX_EPOCH;

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use partwise_protocol::constants::DEFAULT_MIME_TYPE;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;
use crate::fingerprint::Fingerprint;

/// Future returned by [`FileSource::read_range`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, TransferError>> + Send + 'a>>;

/// A live handle to the bytes of a file selected for upload.
///
/// Handles never survive a restart; persisted uploads wait in
/// `awaiting-file` until a matching source is attached again.
pub trait FileSource: Debug + Send + Sync {
    /// File name as shown to the user and sent to the backend.
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Last modification time, in milliseconds since the Unix epoch.
    fn last_modified(&self) -> Option<i64>;

    /// MIME type sent in the initiate request.
    fn mime_type(&self) -> &str;

    /// Reads the bytes `[start, end)`.
    fn read_range(&self, start: u64, end: u64) -> ReadFuture<'_>;

    /// Identity used to match this file against a persisted upload.
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            name: self.name().to_string(),
            size: self.size(),
            last_modified: self.last_modified(),
        }
    }
}

fn check_range(start: u64, end: u64, size: u64) -> Result<(), TransferError> {
    if start > end || end > size {
        return Err(TransferError::RangeOutOfBounds { start, end, size });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// LocalFile
// ---------------------------------------------------------------------------

/// A file on the local filesystem, read on demand one range at a time.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
    last_modified: Option<i64>,
    mime_type: String,
}

impl LocalFile {
    /// Stats `path` and captures its name, size and modification time.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }

        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = guess_mime_type(&name).to_string();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: meta.len(),
            last_modified,
            mime_type,
        })
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn last_modified(&self) -> Option<i64> {
        self.last_modified
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn read_range(&self, start: u64, end: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            check_range(start, end, self.size)?;
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(std::io::SeekFrom::Start(start)).await?;
            let mut buf = vec![0u8; (end - start) as usize];
            // A file truncated since it was selected surfaces as UnexpectedEof.
            file.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryFile
// ---------------------------------------------------------------------------

/// An in-memory file, e.g. data produced by the embedding application.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Bytes,
    last_modified: Option<i64>,
    mime_type: String,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime_type = guess_mime_type(&name).to_string();
        Self {
            name,
            data: data.into(),
            last_modified: None,
            mime_type,
        }
    }

    /// Sets the modification timestamp used for fingerprint matching.
    pub fn with_last_modified(mut self, millis: i64) -> Self {
        self.last_modified = Some(millis);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn last_modified(&self) -> Option<i64> {
        self.last_modified
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn read_range(&self, start: u64, end: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            check_range(start, end, self.size())?;
            Ok(self.data.slice(start as usize..end as usize))
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of a part body, base64-encoded as object stores expect it.
pub fn checksum_part(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Guesses a MIME type from the file extension.
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        _ => DEFAULT_MIME_TYPE,
    }
}
