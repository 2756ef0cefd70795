//! Backend and part-transport traits.
//!
//! The coordinator only talks to storage through these two seams. The
//! reqwest implementation lives in [`crate::http`]; tests plug in mocks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use partwise_protocol::{CompleteResponse, CompletedPart, InitiateRequest, InitiateResponse};

use crate::error::{TransportError, UploadError};

/// Boxed future returned by [`UploadBackend`] calls.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Boxed future returned by [`PartTransport::put_part`], resolving to the part etag.
pub type PartFuture<'a> = Pin<Box<dyn Future<Output = Result<String, TransportError>> + Send + 'a>>;

/// Progress callback: bytes sent so far in the current attempt.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Control-plane API of the multipart storage backend.
pub trait UploadBackend: Send + Sync {
    /// Opens (or re-opens) a multipart session for a file.
    fn initiate<'a>(&'a self, request: &'a InitiateRequest) -> BackendFuture<'a, InitiateResponse>;

    /// Returns a fresh, single-use URL for one part attempt.
    fn part_url<'a>(&'a self, upload_id: &'a str, part_number: u32) -> BackendFuture<'a, String>;

    /// Combines the stored parts into the final object.
    fn complete<'a>(
        &'a self,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BackendFuture<'a, CompleteResponse>;

    /// Discards a partial multipart session.
    fn abort<'a>(&'a self, upload_id: &'a str) -> BackendFuture<'a, ()>;
}

/// Data-plane transfer of one part body to a presigned URL.
pub trait PartTransport: Send + Sync {
    /// Uploads `body` and returns the backend's confirmation token.
    ///
    /// Implementations call `progress` as bytes leave the process. Timeouts
    /// and stall detection are applied by the caller.
    fn put_part<'a>(
        &'a self,
        url: &'a str,
        body: Bytes,
        checksum: Option<String>,
        progress: ProgressFn,
    ) -> PartFuture<'a>;
}
