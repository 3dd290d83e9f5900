//! Lip-sync pages interleaved with audio
//!
//! Lip data is cut into 0x1000-byte pages holding up to 0xFF0 bytes each,
//! followed by a 16-byte null run. A region holding a single page is simply
//! `page ‖ audio`. Longer lip data is spread over segments of a fixed size
//! `S`, each starting with one page and continuing with `S - 0x1000` audio
//! bytes; the last segment carries whatever audio remains. `S` is not stored
//! anywhere and has to be discovered from the null runs.

use tracing::debug;

use crate::error::{Error, Result};

pub const LIP_MAGIC: &[u8; 4] = b"LIP ";
pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_PAYLOAD: usize = 0xFF0;
const NULL_RUN: usize = PAGE_SIZE - PAGE_PAYLOAD;
const MIN_SEGMENT: usize = 0x2000;

/// Lip data carried by a streams entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LipData {
    /// Lip bytes including their 8-byte `LIP ` header
    pub bytes: Vec<u8>,
    /// Segment size the region was stored with; 0 for a single page
    pub segment_size: u32,
}

/// Whether a stored region starts with lip data
#[must_use]
pub fn has_lip(region: &[u8]) -> bool {
    region.starts_with(LIP_MAGIC)
}

/// Number of pages `len` lip bytes occupy
#[must_use]
pub fn pages_for(len: usize) -> usize {
    len.div_ceil(PAGE_PAYLOAD)
}

fn null_run_at(region: &[u8], offset: usize) -> bool {
    region
        .get(offset + PAGE_PAYLOAD..offset + PAGE_PAYLOAD + NULL_RUN)
        .is_some_and(|run| run.iter().all(|&b| b == 0))
}

/// Segment sizes, smallest first, that store `pages` pages in a region of `total` bytes
fn segment_candidates(total: usize, pages: usize) -> impl Iterator<Item = usize> {
    (MIN_SEGMENT..)
        .step_by(PAGE_SIZE)
        .take_while(move |&s| pages >= 2 && (pages - 1) * s < total)
        .filter(move |&s| total.div_ceil(s) == pages && total - (pages - 1) * s >= PAGE_SIZE)
}

/// Find the segment size of a multi-page region
pub fn discover_segment_size(region: &[u8], pages: usize, path: &str) -> Result<usize> {
    let mut candidates = 0;
    for size in segment_candidates(region.len(), pages) {
        candidates += 1;
        if (0..pages).all(|k| null_run_at(region, k * size)) {
            debug!("{}: lip segment size {:#x} over {} pages", path, size, pages);
            return Ok(size);
        }
    }
    if candidates == 0 {
        Err(Error::LipLayoutMismatch {
            path: path.to_string(),
            region_size: region.len() as u64,
        })
    } else {
        Err(Error::LipLayoutNotFound {
            path: path.to_string(),
        })
    }
}

/// Separate a stored region into lip data and `audio_size` bytes of audio
pub fn split(region: &[u8], audio_size: usize, path: &str) -> Result<(LipData, Vec<u8>)> {
    let mismatch = || Error::LipLayoutMismatch {
        path: path.to_string(),
        region_size: region.len() as u64,
    };

    let lip_len = region
        .get(4..8)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .ok_or_else(mismatch)?;
    if lip_len < 8 || region.len() < audio_size {
        return Err(mismatch());
    }
    let extra = region.len() - audio_size;
    if extra % PAGE_SIZE != 0 || extra / PAGE_SIZE != pages_for(lip_len) {
        return Err(mismatch());
    }
    let pages = extra / PAGE_SIZE;

    let segment_size = if pages == 1 {
        if !null_run_at(region, 0) {
            return Err(Error::LipLayoutNotFound {
                path: path.to_string(),
            });
        }
        region.len()
    } else {
        discover_segment_size(region, pages, path)?
    };

    let mut lip = Vec::with_capacity(pages * PAGE_PAYLOAD);
    let mut audio = Vec::with_capacity(audio_size);
    for segment in region.chunks(segment_size) {
        lip.extend_from_slice(&segment[..PAGE_PAYLOAD]);
        audio.extend_from_slice(&segment[PAGE_SIZE..]);
    }
    lip.truncate(lip_len);
    if audio.len() != audio_size {
        return Err(mismatch());
    }

    Ok((
        LipData {
            bytes: lip,
            segment_size: if pages == 1 { 0 } else { segment_size as u32 },
        },
        audio,
    ))
}

impl LipData {
    #[must_use]
    pub fn pages(&self) -> usize {
        pages_for(self.bytes.len())
    }

    /// Interleave the lip pages with `audio` again.
    ///
    /// The stored segment size is kept when it still fits the audio length,
    /// otherwise the smallest one that does is chosen.
    pub fn join(&self, audio: &[u8], path: &str) -> Result<Vec<u8>> {
        let pages = self.pages();
        let total = pages * PAGE_SIZE + audio.len();
        let mut out = Vec::with_capacity(total);

        if pages == 1 {
            out.extend_from_slice(&self.page(0));
            out.extend_from_slice(audio);
            return Ok(out);
        }

        let stored = self.segment_size as usize;
        let fits = |s: usize| segment_candidates(total, pages).any(|c| c == s);
        let segment_size = if stored >= MIN_SEGMENT && fits(stored) {
            stored
        } else {
            segment_candidates(total, pages)
                .next()
                .ok_or_else(|| Error::LipLayoutMismatch {
                    path: path.to_string(),
                    region_size: total as u64,
                })?
        };

        let per_segment = segment_size - PAGE_SIZE;
        let mut rest = audio;
        for k in 0..pages {
            out.extend_from_slice(&self.page(k));
            let take = if k + 1 == pages {
                rest.len()
            } else {
                per_segment.min(rest.len())
            };
            out.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        Ok(out)
    }

    fn page(&self, index: usize) -> [u8; PAGE_SIZE] {
        let mut page = [0u8; PAGE_SIZE];
        let start = index * PAGE_PAYLOAD;
        let end = (start + PAGE_PAYLOAD).min(self.bytes.len());
        if start < end {
            page[..end - start].copy_from_slice(&self.bytes[start..end]);
        }
        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lip_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        bytes[..4].copy_from_slice(LIP_MAGIC);
        bytes[4..8].copy_from_slice(&(len as u32).to_le_bytes());
        for (i, b) in bytes.iter_mut().enumerate().skip(8) {
            *b = (i % 251) as u8 | 1;
        }
        bytes
    }

    fn audio(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8 | 0x80).collect()
    }

    #[test]
    fn test_single_page() {
        let lip = LipData {
            bytes: lip_bytes(100),
            segment_size: 0,
        };
        let sound = audio(777);
        let region = lip.join(&sound, "a").unwrap();
        assert_eq!(region.len(), PAGE_SIZE + 777);

        let (parsed, parsed_audio) = split(&region, 777, "a").unwrap();
        assert_eq!(parsed, lip);
        assert_eq!(parsed_audio, sound);
    }

    #[test]
    fn test_discovers_segment_size() {
        // Three pages of lip data in 0x3000-byte segments
        let lip = lip_bytes(PAGE_PAYLOAD * 2 + 10);
        let sound = audio(0x2000 * 2 + 0x500);
        let mut region = Vec::new();
        let mut rest = sound.as_slice();
        for k in 0..3 {
            let mut page = [0u8; PAGE_SIZE];
            let chunk = &lip[k * PAGE_PAYLOAD..((k + 1) * PAGE_PAYLOAD).min(lip.len())];
            page[..chunk.len()].copy_from_slice(chunk);
            region.extend_from_slice(&page);
            let take = if k == 2 { rest.len() } else { 0x2000 };
            region.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }

        assert_eq!(discover_segment_size(&region, 3, "v").unwrap(), 0x3000);
        let (parsed, parsed_audio) = split(&region, sound.len(), "v").unwrap();
        assert_eq!(parsed.bytes, lip);
        assert_eq!(parsed.segment_size, 0x3000);
        assert_eq!(parsed_audio, sound);

        assert_eq!(parsed.join(&parsed_audio, "v").unwrap(), region);
    }

    #[test]
    fn test_join_picks_new_segment_size_for_shorter_audio() {
        let lip = LipData {
            bytes: lip_bytes(PAGE_PAYLOAD + 1),
            segment_size: 0x8000,
        };
        let sound = audio(0x1800);
        let region = lip.join(&sound, "v").unwrap();
        let (parsed, parsed_audio) = split(&region, sound.len(), "v").unwrap();
        assert_eq!(parsed.bytes, lip.bytes);
        assert_eq!(parsed.segment_size, 0x2000);
        assert_eq!(parsed_audio, sound);
    }

    #[test]
    fn test_inconsistent_region_fails() {
        let lip = lip_bytes(PAGE_PAYLOAD * 2);
        let mut region = vec![0xAAu8; PAGE_SIZE * 2 + 0x1100];
        region[..8].copy_from_slice(&lip[..8]);
        assert!(matches!(
            split(&region, 0x1100, "v"),
            Err(Error::LipLayoutNotFound { .. })
        ));
        assert!(matches!(
            split(&region, 0x1101, "v"),
            Err(Error::LipLayoutMismatch { .. })
        ));
    }
}
