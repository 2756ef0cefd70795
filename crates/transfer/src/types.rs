use partwise_protocol::CompletedPart;
use serde::{Deserialize, Serialize};

/// One contiguous byte range of a file, uploaded as a single part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// 0-based position; stable across resumes.
    pub index: u32,
    /// First byte (inclusive).
    pub start: u64,
    /// Past-the-end byte (exclusive).
    pub end: u64,
    pub uploaded: bool,
    /// Backend confirmation token. Present iff `uploaded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Chunk {
    /// Size of the range in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 1-based part number used on the wire.
    pub fn part_number(&self) -> u32 {
        self.index + 1
    }

    /// Records a confirmed part. Never reverts an uploaded chunk.
    pub fn mark_uploaded(&mut self, etag: String) {
        if self.uploaded {
            return;
        }
        self.uploaded = true;
        self.etag = Some(etag);
    }
}

/// Sum of the lengths of all confirmed chunks.
pub fn uploaded_bytes(chunks: &[Chunk]) -> u64 {
    chunks.iter().filter(|c| c.uploaded).map(Chunk::len).sum()
}

/// Builds the ordered part list for completion.
///
/// Returns `None` while any chunk is still missing its confirmation.
pub fn completed_parts(chunks: &[Chunk]) -> Option<Vec<CompletedPart>> {
    chunks
        .iter()
        .map(|c| match (&c.etag, c.uploaded) {
            (Some(etag), true) => Some(CompletedPart {
                part_number: c.part_number(),
                etag: etag.clone(),
            }),
            _ => None,
        })
        .collect()
}
