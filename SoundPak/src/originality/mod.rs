//! Originality tracking: which entries still match a captured baseline
//!
//! A baseline is captured the first time a blob is seen and stored under its
//! blob hash. Later loads of the same blob restore it, and saving a modified
//! archive links the new blob hash back to the baseline it was derived from.

pub mod cache;

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::model::AudioFile;

pub use cache::{Baseline, MAX_CHAIN_DEPTH, OriginalityCache};

/// Result of attaching a baseline to freshly loaded files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineOutcome {
    /// Snapshot id the baseline was resolved to
    pub root_id: u64,
    /// True when no usable cache existed and the current content became the baseline
    pub regenerated: bool,
    /// Recoverable problem worth surfacing to the user
    pub warning: Option<String>,
}

/// Restore the baseline for `blob_hash`, regenerating it from the current content
/// when the cache is missing, stale or corrupt.
///
/// `files` is iterated in path order, matching the snapshot order.
pub fn attach_baseline(
    files: &mut BTreeMap<String, AudioFile>,
    cache: &OriginalityCache,
    blob_hash: u64,
) -> BaselineOutcome {
    match cache.load(blob_hash, files.len()) {
        Ok(baseline) => {
            for (file, original) in files.values_mut().zip(baseline.records) {
                file.set_baseline(original);
            }
            let changed = files.values().filter(|f| !f.original).count();
            info!(
                "Restored baseline {:016x}: {} of {} entries changed",
                baseline.root_id,
                changed,
                files.len()
            );
            BaselineOutcome {
                root_id: baseline.root_id,
                regenerated: false,
                warning: None,
            }
        }
        Err(err) => {
            let mut warning = match &err {
                crate::error::Error::CacheMissing { .. } => None,
                other => {
                    warn!("Originality cache unusable, regenerating: {}", other);
                    Some(format!("originality cache regenerated: {other}"))
                }
            };
            let outcome = regenerate_baseline(files, cache, blob_hash);
            if outcome.warning.is_some() {
                warning = outcome.warning;
            }
            BaselineOutcome { warning, ..outcome }
        }
    }
}

/// Make the current content the baseline for `blob_hash`
pub fn regenerate_baseline(
    files: &mut BTreeMap<String, AudioFile>,
    cache: &OriginalityCache,
    blob_hash: u64,
) -> BaselineOutcome {
    for file in files.values_mut() {
        file.set_baseline(file.record);
    }
    let records: Vec<_> = files.values().map(|f| f.record).collect();
    let warning = match cache.generate(blob_hash, &records) {
        Ok(path) => {
            info!("Captured baseline of {} entries at {}", records.len(), path.display());
            None
        }
        Err(e) => {
            warn!("Could not persist originality cache: {}", e);
            Some(format!("originality cache not saved: {e}"))
        }
    };
    BaselineOutcome {
        root_id: blob_hash,
        regenerated: true,
        warning,
    }
}

/// Link the snapshot of a newly written blob to the baseline it derives from
pub fn record_saved_blob(cache: &OriginalityCache, new_blob_hash: u64, root_id: u64) -> Option<String> {
    if new_blob_hash == root_id {
        return None;
    }
    match cache.link(new_blob_hash, root_id) {
        Ok(_) => None,
        Err(e) => {
            warn!("Could not link saved archive to its baseline: {}", e);
            Some(format!("originality link not saved: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pcm16_to_bytes;
    use crate::model::{AudioRecord, HashMode};
    use tempfile::TempDir;

    fn files(contents: &[(&str, &[i16])]) -> BTreeMap<String, AudioFile> {
        contents
            .iter()
            .map(|(path, samples)| {
                let data = pcm16_to_bytes(samples);
                let len = data.len();
                let file = AudioFile::new(
                    path,
                    AudioRecord::pcm16(22050, 1, samples.len()),
                    data,
                    0..len,
                    HashMode::Canonical,
                );
                (file.path.clone(), file)
            })
            .collect()
    }

    #[test]
    fn test_generate_then_attach_marks_all_original() {
        let dir = TempDir::new().unwrap();
        let cache = OriginalityCache::new(dir.path(), "gen23", HashMode::Canonical);
        let mut loaded = files(&[("a.wav", &[1, 2]), ("b.wav", &[3, 4])]);

        let first = attach_baseline(&mut loaded, &cache, 42);
        assert!(first.regenerated);
        assert_eq!(first.warning, None);

        let mut reloaded = files(&[("a.wav", &[1, 2]), ("b.wav", &[3, 4])]);
        let second = attach_baseline(&mut reloaded, &cache, 42);
        assert!(!second.regenerated);
        assert!(reloaded.values().all(|f| f.original && !f.dirty));
    }

    #[test]
    fn test_saved_blob_reports_changed_entries() {
        let dir = TempDir::new().unwrap();
        let cache = OriginalityCache::new(dir.path(), "gen23", HashMode::Canonical);
        let mut loaded = files(&[("a.wav", &[1, 2]), ("b.wav", &[3, 4])]);
        let outcome = attach_baseline(&mut loaded, &cache, 1);
        assert!(record_saved_blob(&cache, 2, outcome.root_id).is_none());

        let mut reloaded = files(&[("a.wav", &[1, 2]), ("b.wav", &[9, 9])]);
        let again = attach_baseline(&mut reloaded, &cache, 2);
        assert_eq!(again.root_id, 1);
        assert!(reloaded["a.wav"].original);
        assert!(!reloaded["b.wav"].original);
        assert!(!reloaded["b.wav"].dirty);
    }

    #[test]
    fn test_mismatch_regenerates_with_warning() {
        let dir = TempDir::new().unwrap();
        let cache = OriginalityCache::new(dir.path(), "gen1", HashMode::Canonical);
        let mut one = files(&[("a.wav", &[1])]);
        attach_baseline(&mut one, &cache, 3);

        let mut two = files(&[("a.wav", &[1]), ("b.wav", &[2])]);
        let outcome = attach_baseline(&mut two, &cache, 3);
        assert!(outcome.regenerated);
        assert!(outcome.warning.is_some());
        assert!(two.values().all(|f| f.original));
    }
}
