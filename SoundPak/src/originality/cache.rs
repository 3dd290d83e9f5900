//! On-disk baseline snapshots keyed by blob hash
//!
//! File layout (little endian):
//!
//! ```text
//! u64 parent_id        blob hash of the snapshot this one defers to, 0 if none
//! u64 entry_count      0 when parent_id is set
//! entry_count x 44     AudioRecord snapshots in archive path order
//! ```

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{AudioRecord, HashMode, SNAPSHOT_SIZE};

/// Longest parent chain followed before the cache is declared corrupt
pub const MAX_CHAIN_DEPTH: usize = 16;

const HEADER_SIZE: usize = 16;

/// Baseline records resolved from a snapshot chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    /// Blob hash of the snapshot that actually holds the records
    pub root_id: u64,
    pub records: Vec<AudioRecord>,
}

/// Snapshot store for one archive generation and hash mode
#[derive(Debug, Clone)]
pub struct OriginalityCache {
    dir: PathBuf,
}

impl OriginalityCache {
    /// Cache rooted at `<root>/<prefix>/<hash mode>/`
    #[must_use]
    pub fn new(root: &Path, prefix: &str, mode: HashMode) -> Self {
        Self {
            dir: root.join(prefix).join(mode.as_str()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn snapshot_path(&self, blob_hash: u64) -> PathBuf {
        self.dir.join(format!("{blob_hash:016x}.bin"))
    }

    #[must_use]
    pub fn contains(&self, blob_hash: u64) -> bool {
        self.snapshot_path(blob_hash).is_file()
    }

    /// Persist `records` as the baseline for `blob_hash`
    pub fn generate(&self, blob_hash: u64, records: &[AudioRecord]) -> Result<PathBuf> {
        self.write(blob_hash, 0, records)
    }

    /// Persist a snapshot that defers to `parent_id`
    pub fn link(&self, blob_hash: u64, parent_id: u64) -> Result<PathBuf> {
        if blob_hash == parent_id {
            return Err(Error::CacheCorrupt(format!(
                "snapshot {blob_hash:016x} cannot be its own parent"
            )));
        }
        self.write(blob_hash, parent_id, &[])
    }

    fn write(&self, blob_hash: u64, parent_id: u64, records: &[AudioRecord]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.snapshot_path(blob_hash);
        let tmp = path.with_extension("tmp");

        {
            let file = fs::File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_u64::<LittleEndian>(parent_id)?;
            writer.write_u64::<LittleEndian>(records.len() as u64)?;
            for record in records {
                record.write_snapshot(&mut writer)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;

        debug!(
            "Wrote originality snapshot {} ({} entries, parent {:016x})",
            path.display(),
            records.len(),
            parent_id
        );
        Ok(path)
    }

    /// Resolve the baseline for `blob_hash`, following parent links.
    ///
    /// Fails with [`Error::CacheMismatch`] when the resolved snapshot does not hold
    /// exactly `expected_count` records.
    pub fn load(&self, blob_hash: u64, expected_count: usize) -> Result<Baseline> {
        let mut visited = HashSet::new();
        let mut current = blob_hash;

        loop {
            if !visited.insert(current) {
                return Err(Error::CacheCorrupt(format!(
                    "parent chain of {blob_hash:016x} loops at {current:016x}"
                )));
            }
            if visited.len() > MAX_CHAIN_DEPTH {
                return Err(Error::CacheCorrupt(format!(
                    "parent chain of {blob_hash:016x} is deeper than {MAX_CHAIN_DEPTH}"
                )));
            }

            let path = self.snapshot_path(current);
            if !path.is_file() {
                return Err(Error::CacheMissing { blob_hash: current });
            }
            let bytes = fs::read(&path)?;
            let (parent_id, records) = parse_snapshot(&bytes)?;

            if parent_id != 0 {
                debug!("Snapshot {:016x} defers to {:016x}", current, parent_id);
                current = parent_id;
                continue;
            }

            if records.len() != expected_count {
                return Err(Error::CacheMismatch {
                    cached: records.len() as u64,
                    live: expected_count as u64,
                });
            }
            return Ok(Baseline {
                root_id: current,
                records,
            });
        }
    }
}

fn parse_snapshot(bytes: &[u8]) -> Result<(u64, Vec<AudioRecord>)> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::CacheCorrupt(format!("snapshot of {} bytes", bytes.len())));
    }
    let mut reader = Cursor::new(bytes);
    let parent_id = reader.read_u64::<LittleEndian>()?;
    let count = reader.read_u64::<LittleEndian>()?;

    let expected_len = (count as usize)
        .checked_mul(SNAPSHOT_SIZE)
        .and_then(|n| n.checked_add(HEADER_SIZE));
    if expected_len != Some(bytes.len()) {
        return Err(Error::CacheCorrupt(format!(
            "{count} entries do not fit {} bytes",
            bytes.len()
        )));
    }
    if parent_id != 0 && count != 0 {
        return Err(Error::CacheCorrupt(
            "snapshot with a parent must not hold entries".to_string(),
        ));
    }

    let records = (0..count)
        .map(|_| AudioRecord::read_snapshot(&mut reader))
        .collect::<Result<Vec<_>>>()?;
    Ok((parent_id, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn records(n: u32) -> Vec<AudioRecord> {
        (0..n)
            .map(|i| AudioRecord {
                hash: u64::from(i) + 100,
                ..AudioRecord::pcm16(22050, 1, i as usize)
            })
            .collect()
    }

    #[test]
    fn test_generate_then_load() {
        let dir = TempDir::new().unwrap();
        let cache = OriginalityCache::new(dir.path(), "gen23", HashMode::Canonical);
        let path = cache.generate(0xABCD, &records(3)).unwrap();
        assert!(path.ends_with("gen23/canonical/000000000000abcd.bin"));
        assert_eq!(fs::metadata(&path).unwrap().len(), 16 + 3 * 44);

        let baseline = cache.load(0xABCD, 3).unwrap();
        assert_eq!(baseline.root_id, 0xABCD);
        assert_eq!(baseline.records, records(3));
    }

    #[test]
    fn test_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let cache = OriginalityCache::new(dir.path(), "gen1", HashMode::Canonical);
        cache.generate(1, &records(2)).unwrap();
        assert!(matches!(
            cache.load(1, 3),
            Err(Error::CacheMismatch { cached: 2, live: 3 })
        ));
    }

    #[test]
    fn test_parent_chain() {
        let dir = TempDir::new().unwrap();
        let cache = OriginalityCache::new(dir.path(), "gen4", HashMode::Direct);
        cache.generate(10, &records(2)).unwrap();
        cache.link(20, 10).unwrap();
        cache.link(30, 20).unwrap();

        let baseline = cache.load(30, 2).unwrap();
        assert_eq!(baseline.root_id, 10);
        assert_eq!(baseline.records.len(), 2);
    }

    #[test]
    fn test_parent_cycle() {
        let dir = TempDir::new().unwrap();
        let cache = OriginalityCache::new(dir.path(), "gen4", HashMode::Direct);
        cache.link(1, 2).unwrap();
        cache.link(2, 1).unwrap();
        assert!(matches!(cache.load(1, 0), Err(Error::CacheCorrupt(_))));
    }

    #[test]
    fn test_missing_and_truncated() {
        let dir = TempDir::new().unwrap();
        let cache = OriginalityCache::new(dir.path(), "gen1", HashMode::Canonical);
        assert!(matches!(cache.load(5, 0), Err(Error::CacheMissing { blob_hash: 5 })));

        let path = cache.generate(5, &records(1)).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(cache.load(5, 1), Err(Error::CacheCorrupt(_))));
    }

    #[test]
    fn test_modes_do_not_mix() {
        let dir = TempDir::new().unwrap();
        let canonical = OriginalityCache::new(dir.path(), "gen1", HashMode::Canonical);
        let direct = OriginalityCache::new(dir.path(), "gen1", HashMode::Direct);
        canonical.generate(7, &records(1)).unwrap();
        assert!(canonical.contains(7));
        assert!(!direct.contains(7));
    }
}
