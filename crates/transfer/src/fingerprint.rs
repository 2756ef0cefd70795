use serde::{Deserialize, Serialize};

/// Identity of a selected file: `(name, size, last-modified)`.
///
/// Used to match a reselected file against an upload restored from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

impl Fingerprint {
    /// Strict match used when files are enqueued.
    ///
    /// Name and size must be equal; last-modified must also be equal when
    /// both sides know it.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        if !self.matches_loosely(other) {
            return false;
        }
        match (self.last_modified, other.last_modified) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Name and size only. Used for explicit recovery, where a copy of the
    /// original file (with a new timestamp) is acceptable.
    pub fn matches_loosely(&self, other: &Fingerprint) -> bool {
        self.name == other.name && self.size == other.size
    }
}
