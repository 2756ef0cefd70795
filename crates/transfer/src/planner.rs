use std::collections::HashMap;

use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_SIZE, MAX_PARTS};

/// Returns the part size [`plan`] uses for `file_size`.
///
/// 0 means [`DEFAULT_CHUNK_SIZE`]. The size is raised when needed so the
/// file fits in [`MAX_PARTS`] parts.
pub fn effective_chunk_size(file_size: u64, chunk_size: u64) -> u64 {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    chunk_size.max(file_size.div_ceil(MAX_PARTS))
}

/// Splits `[0, file_size)` into parts of `chunk_size` bytes.
///
/// Parts listed in `already_uploaded` (1-based part numbers) are pre-marked
/// as uploaded with the matching etag from `part_etags`, so a resumed upload
/// never re-sends bytes the backend already stores. A listed part without an
/// etag, or outside the plan, stays pending: it could not be finalized anyway.
///
/// The part size is [`effective_chunk_size`]. If it had to be raised, the
/// listed parts cover other byte ranges and none is pre-marked. The result
/// depends only on the inputs.
pub fn plan(
    file_size: u64,
    chunk_size: u64,
    already_uploaded: &[u32],
    part_etags: &HashMap<u32, String>,
) -> Vec<Chunk> {
    let requested = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let chunk_size = effective_chunk_size(file_size, chunk_size);

    // At most MAX_PARTS, so every index fits in u32.
    let count = file_size.div_ceil(chunk_size) as u32;
    let mut chunks: Vec<Chunk> = (0..count)
        .map(|index| {
            let start = u64::from(index) * chunk_size;
            Chunk {
                index,
                start,
                end: (start + chunk_size).min(file_size),
                uploaded: false,
                etag: None,
            }
        })
        .collect();

    if chunk_size != requested {
        return chunks;
    }
    for &part in already_uploaded {
        let Some(index) = part.checked_sub(1) else {
            continue;
        };
        if let Some(chunk) = chunks.get_mut(index as usize)
            && let Some(etag) = part_etags.get(&part)
        {
            chunk.mark_uploaded(etag.clone());
        }
    }

    chunks
}
