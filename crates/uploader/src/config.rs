//! Coordinator configuration.

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::transport::TransferLimits;

/// Tunables for the upload coordinator.
///
/// Every field has a default, so a partial JSON document is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploaderConfig {
    /// Maximum number of files uploading at the same time.
    pub max_parallel: usize,
    /// Maximum number of unfinished uploads held by the queue.
    pub max_files: usize,
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    /// Part size used when the backend does not dictate one.
    pub default_chunk_size: u64,
    pub retry: RetryPolicy,
    pub limits: TransferLimits,
    /// Send a SHA-256 checksum header with every part.
    pub part_checksums: bool,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            max_files: 100,
            max_file_size: 5 * 1024 * 1024 * 1024,
            default_chunk_size: partwise_transfer::DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            limits: TransferLimits::default(),
            part_checksums: false,
        }
    }
}
