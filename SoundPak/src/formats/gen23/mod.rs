//! Generations 2 and 3: per-scene WHD indices over a shared `streams.wav`
//!
//! The archive root holds any number of `.whd` scene indices (searched
//! recursively), each optionally paired with a `<scene>.wav` blob, plus one
//! archive-wide `streams.wav`. Despite the extension, neither blob is a WAV
//! file: both are raw payloads addressed by the WHD records' offsets.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;
use xxhash_rust::xxh3::Xxh3;

use super::common::{read_sibling, slice_at, write_file};
use super::layout::{BlobSlot, rebuild_blob};
use super::whd::{
    Candidate, Placement, WhdScene, archive_root, hash_scenes, load_scenes, output_root, rebuild_scenes,
    register_candidates, scene_candidates, to_u32, write_scenes,
};
use super::{ArchiveLayout, ArchiveParser, Generation, LoadedArchive, layout_mismatch};
use crate::error::{Error, Result};
use crate::model::HashMode;
use crate::progress::{ArchivePhase, ArchiveProgress, ProgressCallback};
use crate::utils::normalize_archive_path;

/// File name of the shared blob at the archive root
pub const STREAMS_BLOB: &str = "streams.wav";

/// Write-back state of a Gen-2/3 archive
#[derive(Debug, Clone)]
pub struct WhdArchive {
    /// Scenes sorted by relative path
    pub scenes: Vec<WhdScene>,
    /// Original `streams.wav`, when the archive has one
    pub streams: Option<Vec<u8>>,
}

impl WhdArchive {
    /// Hash over the shared blob followed by every scene
    #[must_use]
    pub fn blob_hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        if let Some(streams) = &self.streams {
            hasher.update(streams);
        }
        hash_scenes(&mut hasher, &self.scenes);
        hasher.digest()
    }

    fn streams_records(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.scenes.iter().enumerate().flat_map(|(s, scene)| {
            scene
                .file
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.placement == Placement::Streams)
                .map(move |(i, _)| (s, i))
        })
    }
}

/// Generation 2/3 parser
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen23Parser;

fn streams_path(root: &Path) -> PathBuf {
    root.join(STREAMS_BLOB)
}

impl ArchiveParser for Gen23Parser {
    fn generation(&self) -> Generation {
        Generation::Gen23
    }

    fn load(&self, source: &Path, mode: HashMode, progress: ProgressCallback) -> Result<LoadedArchive> {
        let start = Instant::now();
        let root = archive_root(source);
        let scenes = load_scenes(&root, progress)?;

        let mut archive = WhdArchive {
            scenes,
            streams: None,
        };
        if archive.streams_records().next().is_some() || streams_path(&root).is_file() {
            archive.streams = Some(read_sibling(&streams_path(&root))?);
        }

        progress(&ArchiveProgress::new(ArchivePhase::ReadingEntries, 0, 1));
        let mut candidates = scene_candidates(&archive.scenes)?;
        let streams = archive.streams.as_deref().unwrap_or_default();
        for (s, i) in archive.streams_records() {
            let record = &archive.scenes[s].file.records[i];
            candidates.push(Candidate {
                display_path: &record.path,
                record: record.audio_record(),
                bytes: slice_at(
                    streams,
                    u64::from(record.data_offset),
                    u64::from(record.data_size),
                    "streams blob record",
                )?,
            });
        }

        let files = register_candidates(candidates, mode, progress)?;
        let blob_hash = archive.blob_hash();

        info!(
            "Loaded Gen-2/3 archive {} ({} scenes, {} files) in {:.2?}",
            root.display(),
            archive.scenes.len(),
            files.len(),
            start.elapsed()
        );

        Ok(LoadedArchive {
            files,
            layout: ArchiveLayout::Gen23(archive),
            blob_hash,
            warnings: Vec::new(),
        })
    }

    fn save(&self, archive: &LoadedArchive, dest: &Path, progress: ProgressCallback) -> Result<u64> {
        let ArchiveLayout::Gen23(layout) = &archive.layout else {
            return Err(layout_mismatch(Generation::Gen23, &archive.layout));
        };
        let root = output_root(dest);
        let mut out = layout.clone();

        progress(&ArchiveProgress::new(ArchivePhase::WritingBlobs, 0, 2));
        if let Some(original) = &layout.streams {
            let refs: Vec<(usize, usize)> = layout.streams_records().collect();
            let mut slots = Vec::with_capacity(refs.len());
            for &(s, i) in &refs {
                let record = &layout.scenes[s].file.records[i];
                let key = normalize_archive_path(&record.path);
                let file = archive
                    .files
                    .get(&key)
                    .ok_or_else(|| Error::FileNotFoundInArchive(key.clone()))?;
                slots.push(BlobSlot {
                    offset: u64::from(record.data_offset),
                    size: u64::from(record.data_size),
                    data: file.payload(),
                });
            }
            let rebuilt = rebuild_blob(original, &slots);

            for (slot, &(s, i)) in refs.iter().enumerate() {
                let record = &mut out.scenes[s].file.records[i];
                let key = normalize_archive_path(&record.path);
                let file = archive
                    .files
                    .get(&key)
                    .ok_or_else(|| Error::FileNotFoundInArchive(key.clone()))?;
                record.apply(&file.record);
                record.data_size = to_u32(file.payload().len() as u64, &key)?;
                record.data_offset = to_u32(rebuilt.offsets[slot], &key)?;
            }
            out.streams = Some(rebuilt.bytes);
        }

        progress(&ArchiveProgress::new(ArchivePhase::WritingBlobs, 1, 2));
        rebuild_scenes(&mut out.scenes, &archive.files)?;

        progress(&ArchiveProgress::new(ArchivePhase::WritingIndex, 2, 2));
        if let Some(streams) = &out.streams {
            write_file(&streams_path(&root), streams)?;
        }
        write_scenes(&root, &out.scenes)?;

        info!("Saved Gen-2/3 archive to {}", root.display());
        Ok(out.blob_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pcm16_to_bytes;
    use crate::formats::whd::{WhdRecord, build_whd};
    use crate::model::AudioFormat;
    use crate::progress::no_progress;

    fn pcm_record(path: &str, placement: Placement, offset: u32, size: u32) -> (String, WhdRecord) {
        (
            path.to_string(),
            WhdRecord {
                path_offset: 0,
                format: AudioFormat::Pcm16,
                channels: 1,
                sample_rate: 22050,
                bits_per_sample: 16,
                block_align: 2,
                samples_per_block: 1,
                data_size: size,
                data_size_uncompressed: size,
                placement,
                data_offset: offset,
                unknown: 7,
                path: String::new(),
            },
        )
    }

    fn write_archive(root: &Path) -> (Vec<u8>, Vec<u8>) {
        let a = pcm16_to_bytes(&[100, 200, 300, 400]);
        let b = pcm16_to_bytes(&[-5, -6]);
        // Four bytes of padding between the two streams
        let mut streams = a.clone();
        streams.extend_from_slice(&[0xEE; 4]);
        streams.extend_from_slice(&b);
        let scene_blob = pcm16_to_bytes(&[9, 9, 9]);

        let whd = build_whd(vec![
            pcm_record("sfx\\a.wav", Placement::Streams, 0, 8),
            pcm_record("sfx\\b.wav", Placement::Streams, 12, 4),
            pcm_record("scene\\c.wav", Placement::Scene, 0, 6),
        ]);
        write_file(&root.join("streams.wav"), &streams).unwrap();
        write_file(&root.join("level1").join("intro.whd"), &whd.to_bytes().unwrap()).unwrap();
        write_file(&root.join("level1").join("intro.wav"), &scene_blob).unwrap();
        (streams, scene_blob)
    }

    #[test]
    fn test_load_registers_all_records() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path());

        let loaded = Gen23Parser
            .load(dir.path(), HashMode::Canonical, &no_progress)
            .unwrap();
        assert_eq!(loaded.files.len(), 3);
        assert_eq!(loaded.files["sfx/b.wav"].payload(), pcm16_to_bytes(&[-5, -6]).as_slice());
        assert!(loaded.files.values().all(|f| f.original && !f.dirty));
    }

    #[test]
    fn test_unchanged_save_is_byte_identical() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let (streams, scene_blob) = write_archive(src.path());

        let loaded = Gen23Parser.load(src.path(), HashMode::Direct, &no_progress).unwrap();
        let hash = Gen23Parser.save(&loaded, dst.path(), &no_progress).unwrap();
        assert_eq!(hash, loaded.blob_hash);

        assert_eq!(std::fs::read(dst.path().join("streams.wav")).unwrap(), streams);
        assert_eq!(
            std::fs::read(dst.path().join("level1").join("intro.wav")).unwrap(),
            scene_blob
        );
        assert_eq!(
            std::fs::read(dst.path().join("level1").join("intro.whd")).unwrap(),
            std::fs::read(src.path().join("level1").join("intro.whd")).unwrap()
        );
    }

    #[test]
    fn test_record_out_of_range_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path());
        write_file(&dir.path().join("streams.wav"), &[0u8; 10]).unwrap();

        let err = Gen23Parser
            .load(dir.path(), HashMode::Direct, &no_progress)
            .unwrap_err();
        assert!(matches!(err, Error::RangeOutOfBounds { .. }));
    }
}
