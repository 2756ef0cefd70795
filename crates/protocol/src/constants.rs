use std::time::Duration;

/// Path of the initiate endpoint, relative to the backend base URL.
pub const INITIATE_PATH: &str = "/uploads/initiate";

/// Response header carrying the confirmation token of a stored part.
pub const ETAG_HEADER: &str = "etag";

/// Optional request header carrying the base64 SHA-256 of a part body.
pub const CHECKSUM_HEADER: &str = "x-amz-checksum-sha256";

/// MIME type used when the file type cannot be determined.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Time without byte progress after which a part attempt counts as stalled.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard upper bound for a single part attempt.
///
/// Independent of [`STALL_TIMEOUT`]: a slow but steadily progressing
/// transfer is still aborted once this elapses.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Returns the part-url endpoint path for an upload.
pub fn part_url_path(upload_id: &str) -> String {
    format!("/uploads/{upload_id}/part-url")
}

/// Returns the completion endpoint path for an upload.
pub fn complete_path(upload_id: &str) -> String {
    format!("/uploads/{upload_id}/complete")
}

/// Returns the abort (cleanup) endpoint path for an upload.
pub fn abort_path(upload_id: &str) -> String {
    format!("/uploads/{upload_id}")
}
