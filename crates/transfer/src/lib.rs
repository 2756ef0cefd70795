//! Chunk planning and byte-range file access for resumable multipart uploads.

mod fingerprint;
mod planner;
mod progress;
mod source;
mod types;

pub use fingerprint::Fingerprint;
pub use planner::{effective_chunk_size, plan};
pub use progress::SpeedCalculator;
pub use source::{FileSource, LocalFile, MemoryFile, checksum_part, guess_mime_type};
pub use types::{Chunk, completed_parts, uploaded_bytes};

/// Default part size: 5 MiB.
///
/// Matches the smallest part most multipart object stores accept.
/// The backend may dictate a different size in its initiate response.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Most parts one multipart upload may have.
pub const MAX_PARTS: u64 = 10_000;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("byte range {start}..{end} outside file of {size} bytes")]
    RangeOutOfBounds { start: u64, end: u64, size: u64 },
}
