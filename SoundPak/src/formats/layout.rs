//! Rebuilding offset-addressed blobs on save
//!
//! Entries keep their original order. Bytes no entry covered ("extras":
//! padding, unknown data) are copied verbatim into the same gap between the
//! same neighbours, so a rebuilt blob keeps the structure of the original.
//! Entries that overlapped keep overlapping as long as they are unchanged.

use tracing::debug;

/// One entry placed in a blob
#[derive(Debug, Clone, Copy)]
pub struct BlobSlot<'a> {
    /// Offset in the original blob
    pub offset: u64,
    /// Extent in the original blob
    pub size: u64,
    /// Bytes to write now
    pub data: &'a [u8],
}

/// A rebuilt blob and where each slot landed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuiltBlob {
    pub bytes: Vec<u8>,
    /// New offset of each slot, in input order
    pub offsets: Vec<u64>,
    /// Number of uncovered ranges carried over
    pub extras: usize,
}

/// Whether a slot still holds exactly its original bytes
fn is_unchanged(original: &[u8], slot: &BlobSlot<'_>) -> bool {
    let (Ok(start), Ok(size)) = (usize::try_from(slot.offset), usize::try_from(slot.size)) else {
        return false;
    };
    start
        .checked_add(size)
        .and_then(|end| original.get(start..end))
        .is_some_and(|bytes| bytes == slot.data)
}

/// Lay `slots` out again, preserving every uncovered byte range of `original`.
///
/// Slots whose original ranges overlap form one cluster. Unchanged members
/// of a cluster keep sharing the cluster's original bytes, written once, at
/// their old relative positions. Changed members are appended after it.
#[must_use]
pub fn rebuild_blob(original: &[u8], slots: &[BlobSlot<'_>]) -> RebuiltBlob {
    let mut order: Vec<usize> = (0..slots.len()).collect();
    order.sort_by_key(|&i| (slots[i].offset, i));

    let original_len = original.len() as u64;
    let mut out = RebuiltBlob {
        bytes: Vec::with_capacity(original.len()),
        offsets: vec![0; slots.len()],
        extras: 0,
    };

    let mut cursor = 0u64;
    let mut idx = 0;
    while idx < order.len() {
        let cluster_start = slots[order[idx]].offset;
        let mut cluster_end = cluster_start.saturating_add(slots[order[idx]].size);
        let mut next = idx + 1;
        // Zero-sized slots still join a cluster opening at their offset
        let reach = |end: u64| end.max(cluster_start.saturating_add(1));
        while next < order.len() && slots[order[next]].offset < reach(cluster_end) {
            let slot = &slots[order[next]];
            cluster_end = cluster_end.max(slot.offset.saturating_add(slot.size));
            next += 1;
        }
        let cluster = &order[idx..next];

        if cluster_start > cursor {
            let start = cursor.min(original_len) as usize;
            let end = cluster_start.min(original_len) as usize;
            out.bytes.extend_from_slice(&original[start..end]);
            out.extras += 1;
        }

        let kept: Vec<usize> = cluster
            .iter()
            .copied()
            .filter(|&i| is_unchanged(original, &slots[i]))
            .collect();
        if !kept.is_empty() {
            let base = out.bytes.len() as u64;
            let span_end = kept
                .iter()
                .map(|&i| slots[i].offset + slots[i].size)
                .max()
                .unwrap_or(cluster_start);
            out.bytes
                .extend_from_slice(&original[cluster_start as usize..span_end as usize]);
            for &i in &kept {
                out.offsets[i] = base + (slots[i].offset - cluster_start);
            }
        }

        // Changed entries with identical content share one slot again
        let mut placed: Vec<(usize, u64)> = Vec::new();
        for &i in cluster.iter().filter(|&&i| !kept.contains(&i)) {
            let slot = &slots[i];
            if let Some(&(_, at)) = placed.iter().find(|(j, _)| slots[*j].data == slot.data) {
                out.offsets[i] = at;
                continue;
            }
            let at = out.bytes.len() as u64;
            out.bytes.extend_from_slice(slot.data);
            out.offsets[i] = at;
            placed.push((i, at));
        }

        cursor = cursor.max(cluster_end);
        idx = next;
    }

    if cursor < original_len {
        out.bytes.extend_from_slice(&original[cursor as usize..]);
        out.extras += 1;
    }

    debug!(
        "Rebuilt blob: {} slots, {} extra ranges, {} -> {} bytes",
        slots.len(),
        out.extras,
        original.len(),
        out.bytes.len()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchanged_blob_is_identical() {
        let original = b"HDRaaaa--bbbbbbTAIL".to_vec();
        let slots = [
            BlobSlot { offset: 3, size: 4, data: b"aaaa" },
            BlobSlot { offset: 9, size: 6, data: b"bbbbbb" },
        ];
        let rebuilt = rebuild_blob(&original, &slots);
        assert_eq!(rebuilt.bytes, original);
        assert_eq!(rebuilt.offsets, vec![3, 9]);
        assert_eq!(rebuilt.extras, 3);
    }

    #[test]
    fn test_extras_stay_between_neighbours() {
        let original = b"aaaa--bbbb".to_vec();
        let slots = [
            BlobSlot { offset: 6, size: 4, data: b"BB" },
            BlobSlot { offset: 0, size: 4, data: b"AAAAAA" },
        ];
        let rebuilt = rebuild_blob(&original, &slots);
        assert_eq!(rebuilt.bytes, b"AAAAAA--BB".to_vec());
        assert_eq!(rebuilt.offsets, vec![8, 0]);
    }

    #[test]
    fn test_shared_offsets() {
        let original = b"xxxxyyyy".to_vec();
        let slots = [
            BlobSlot { offset: 0, size: 4, data: b"xxxx" },
            BlobSlot { offset: 0, size: 4, data: b"xxxx" },
            BlobSlot { offset: 4, size: 4, data: b"yyyy" },
        ];
        let rebuilt = rebuild_blob(&original, &slots);
        assert_eq!(rebuilt.bytes, original);
        assert_eq!(rebuilt.offsets, vec![0, 0, 4]);

        // Diverged content gets its own slot
        let slots = [
            BlobSlot { offset: 0, size: 4, data: b"xxxx" },
            BlobSlot { offset: 0, size: 4, data: b"zz" },
        ];
        let rebuilt = rebuild_blob(b"xxxx", &slots);
        assert_eq!(rebuilt.bytes, b"xxxxzz".to_vec());
        assert_eq!(rebuilt.offsets, vec![0, 4]);
    }

    #[test]
    fn test_overlapping_ranges_written_once() {
        // "bbbb" lies inside "aabbbbaa", and "bbaa" straddles its tail
        let original = b"--aabbbbaa--".to_vec();
        let slots = [
            BlobSlot { offset: 2, size: 8, data: b"aabbbbaa" },
            BlobSlot { offset: 4, size: 4, data: b"bbbb" },
            BlobSlot { offset: 6, size: 4, data: b"bbaa" },
        ];
        let rebuilt = rebuild_blob(&original, &slots);
        assert_eq!(rebuilt.bytes, original);
        assert_eq!(rebuilt.offsets, vec![2, 4, 6]);
        assert_eq!(rebuilt.extras, 2);

        // A changed member moves out; the others keep sharing the original bytes
        let slots = [
            BlobSlot { offset: 2, size: 8, data: b"aabbbbaa" },
            BlobSlot { offset: 4, size: 4, data: b"cc" },
        ];
        let rebuilt = rebuild_blob(&original, &slots);
        assert_eq!(rebuilt.bytes, b"--aabbbbaacc--".to_vec());
        assert_eq!(rebuilt.offsets, vec![2, 10]);
    }
}
