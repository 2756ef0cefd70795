use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new multipart upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// One stored part, as listed in the completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Finalizes a multipart upload.
///
/// Parts must be listed in ascending part-number order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub parts: Vec<CompletedPart>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Backend answer to an initiate request.
///
/// Everything except `upload_id` is optional: backends that do not support
/// resume, quotas, or custom part sizes simply omit those fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    #[serde(default)]
    pub upload_id: String,
    /// Backend-dictated part size; overrides the client default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    /// 1-based part numbers the backend already stores for this upload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub already_uploaded_parts: Vec<u32>,
    /// Etags of the already stored parts, keyed by part number.
    #[serde(
        default,
        rename = "partsETags",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub parts_etags: HashMap<u32, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_bytes: Option<u64>,
}

impl InitiateResponse {
    /// Returns the admission rejection message, if the backend refused `size` bytes.
    pub fn rejection(&self, size: u64) -> Option<String> {
        if self.allowed == Some(false) {
            return Some(
                self.reason
                    .clone()
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "upload not allowed".into()),
            );
        }
        match self.remaining_bytes {
            Some(remaining) if remaining < size => Some(format!(
                "quota exceeded: {remaining} bytes remaining, {size} required"
            )),
            _ => None,
        }
    }
}

/// Short-lived URL for one part attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUrlResponse {
    pub url: String,
}

/// Backend answer to a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub file_url: String,
}
