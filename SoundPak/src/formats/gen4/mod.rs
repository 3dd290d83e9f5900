//! Generation 4: WHD scenes plus a `streams.str` container
//!
//! Scene records with placement 0 live in their `<scene>.wav` blob exactly as
//! in generations 2/3. Placement 1 records point at an entry of
//! `streams.str` instead and are not separate audio files.
//!
//! Entries of the streams container come in two shapes:
//!
//! - standalone entries owning their region
//! - alias groups, three entries sharing one region: a master placeholder
//!   (no extension, empty) and two PCM16 sub streams interleaved by
//!   [`alias::strides`]
//!
//! Either shape may carry lip pages in front of and between the audio, see
//! [`lip`].

pub mod alias;
pub mod lip;
pub mod streams;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};
use xxhash_rust::xxh3::Xxh3;

use super::common::{read_sibling, write_file};
use super::layout::{BlobSlot, rebuild_blob};
use super::whd::{
    Candidate, Placement, WhdScene, archive_root, hash_scenes, load_scenes, output_root, rebuild_scenes,
    register_candidates, scene_candidates, to_u32, write_scenes,
};
use super::{ArchiveLayout, ArchiveParser, Generation, LoadedArchive, layout_mismatch};
use crate::error::{Error, Result};
use crate::model::{AudioFile, HashMode};
use crate::progress::{ArchivePhase, ArchiveProgress, ProgressCallback};
use crate::utils::normalize_archive_path;

pub use lip::LipData;
pub use streams::{StrEntry, StreamsFile};

/// File name of the streams container at the archive root
pub const STREAMS_CONTAINER: &str = "streams.str";

/// How entries of the streams container own their region
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryGroup {
    Standalone {
        entry: usize,
        lip: Option<LipData>,
    },
    Alias {
        master: usize,
        sub1: usize,
        sub2: usize,
        lip: Option<LipData>,
    },
}

impl EntryGroup {
    #[must_use]
    pub fn lip(&self) -> Option<&LipData> {
        match self {
            EntryGroup::Standalone { lip, .. } | EntryGroup::Alias { lip, .. } => lip.as_ref(),
        }
    }

    /// Entry indices of the group; the first one holds the group's offset
    #[must_use]
    pub fn members(&self) -> Vec<usize> {
        match *self {
            EntryGroup::Standalone { entry, .. } => vec![entry],
            EntryGroup::Alias {
                master, sub1, sub2, ..
            } => vec![master, sub1, sub2],
        }
    }
}

/// Write-back state of a Gen-4 archive
#[derive(Debug, Clone)]
pub struct Gen4Layout {
    pub scenes: Vec<WhdScene>,
    pub streams: StreamsFile,
    pub groups: Vec<EntryGroup>,
    /// Group of every registered streams path
    pub group_of: BTreeMap<String, usize>,
}

impl Gen4Layout {
    /// Lip data of the group holding `path`
    #[must_use]
    pub fn lip(&self, path: &str) -> Option<&LipData> {
        self.group_of
            .get(&normalize_archive_path(path))
            .and_then(|&g| self.groups[g].lip())
    }

    /// Whether `path` is a sub stream of an alias group
    #[must_use]
    pub fn is_alias_member(&self, path: &str) -> bool {
        self.group_of
            .get(&normalize_archive_path(path))
            .is_some_and(|&g| matches!(self.groups[g], EntryGroup::Alias { .. }))
    }

    fn blob_hash(&self, streams_bytes: &[u8]) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(streams_bytes);
        hash_scenes(&mut hasher, &self.scenes);
        hasher.digest()
    }
}

fn streams_path(root: &Path) -> PathBuf {
    root.join(STREAMS_CONTAINER)
}

/// Group entries by shared offset and split their regions into audio payloads
fn split_groups(streams: &StreamsFile) -> Result<(Vec<EntryGroup>, Vec<(usize, Vec<u8>)>)> {
    let mut by_offset: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (i, entry) in streams.entries.iter().enumerate() {
        by_offset.entry(entry.data_offset).or_default().push(i);
    }

    let mut groups = Vec::new();
    let mut payloads = Vec::new();
    for (offset, members) in by_offset {
        if members.iter().all(|&i| streams.entries[i].alias_order == 0) {
            for i in members {
                let entry = &streams.entries[i];
                let region = streams.region(entry)?;
                let (lip, audio) = if lip::has_lip(region) {
                    let (lip, audio) = lip::split(region, entry.data_size as usize, &entry.path)?;
                    (Some(lip), audio)
                } else if region.len() == entry.data_size as usize {
                    (None, region.to_vec())
                } else {
                    return Err(Error::MalformedRecord {
                        path: entry.path.clone(),
                        reason: format!(
                            "{} byte region for {} bytes of audio",
                            region.len(),
                            entry.data_size
                        ),
                    });
                };
                payloads.push((i, audio));
                groups.push(EntryGroup::Standalone { entry: i, lip });
            }
            continue;
        }

        let (master, sub1, sub2) = alias_members(streams, offset, &members)?;
        let (e1, e2) = (&streams.entries[sub1], &streams.entries[sub2]);
        let region = streams.region(&streams.entries[master])?;
        let audio_size = e1.data_size as usize + e2.data_size as usize;
        let (lip, audio) = if lip::has_lip(region) {
            let (lip, audio) = lip::split(region, audio_size, &e1.path)?;
            (Some(lip), audio)
        } else {
            (None, region.to_vec())
        };

        let strides = alias::strides(&e1.audio_record(), &e2.audio_record(), offset)?;
        let (a, b) = alias::deinterleave(
            &audio,
            e1.data_size as usize,
            e2.data_size as usize,
            strides,
            offset,
        )?;
        debug!(
            "Alias group at {:#x}: {} / {} (strides {} / {})",
            offset, e1.path, e2.path, strides.a, strides.b
        );
        payloads.push((sub1, a));
        payloads.push((sub2, b));
        groups.push(EntryGroup::Alias {
            master,
            sub1,
            sub2,
            lip,
        });
    }
    Ok((groups, payloads))
}

/// Validate an alias group, returning its master, sub1 and sub2
fn alias_members(streams: &StreamsFile, offset: u64, members: &[usize]) -> Result<(usize, usize, usize)> {
    let invalid = |reason: &str| Error::InvalidAliasGroup {
        offset,
        reason: reason.to_string(),
    };
    if members.len() != 3 {
        return Err(invalid(&format!("{} entries instead of 3", members.len())));
    }
    let find = |order: u16| {
        members
            .iter()
            .copied()
            .find(|&i| streams.entries[i].alias_order == order)
    };
    let (Some(master), Some(sub1), Some(sub2)) = (find(0), find(1), find(2)) else {
        return Err(invalid("orders must be 0, 1 and 2"));
    };

    let entry = &streams.entries[master];
    if entry.has_extension() || entry.data_size != 0 {
        return Err(invalid("master must be an empty entry without extension"));
    }
    if members
        .iter()
        .any(|&i| streams.entries[i].region_size != entry.region_size)
    {
        return Err(invalid("members disagree on the region size"));
    }
    Ok((master, sub1, sub2))
}

fn file_for<'a>(files: &'a BTreeMap<String, AudioFile>, path: &str) -> Result<&'a AudioFile> {
    let key = normalize_archive_path(path);
    files.get(&key).ok_or(Error::FileNotFoundInArchive(key))
}

/// Generation 4 parser
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen4Parser;

impl ArchiveParser for Gen4Parser {
    fn generation(&self) -> Generation {
        Generation::Gen4
    }

    fn load(&self, source: &Path, mode: HashMode, progress: ProgressCallback) -> Result<LoadedArchive> {
        let start = Instant::now();
        let root = archive_root(source);
        let scenes = load_scenes(&root, progress)?;
        let streams_bytes = read_sibling(&streams_path(&root))?;
        let streams = StreamsFile::parse(&streams_bytes)?;

        progress(&ArchiveProgress::new(
            ArchivePhase::ReadingEntries,
            0,
            streams.entries.len(),
        ));
        let (groups, payloads) = split_groups(&streams)?;

        for scene in &scenes {
            for record in scene.file.records.iter().filter(|r| r.placement == Placement::Streams) {
                if !streams
                    .entries
                    .iter()
                    .any(|e| e.data_offset == u64::from(record.data_offset))
                {
                    return Err(Error::MalformedRecord {
                        path: scene.relative.display().to_string(),
                        reason: format!(
                            "{} points at {:#x}, which starts no streams entry",
                            record.path, record.data_offset
                        ),
                    });
                }
            }
        }

        let mut candidates: Vec<Candidate<'_>> = scene_candidates(&scenes)?;
        for (i, payload) in &payloads {
            let entry = &streams.entries[*i];
            candidates.push(Candidate {
                display_path: &entry.path,
                record: entry.audio_record(),
                bytes: payload,
            });
        }
        let files = register_candidates(candidates, mode, progress)?;

        let mut group_of = BTreeMap::new();
        for (g, group) in groups.iter().enumerate() {
            for i in group.members() {
                group_of.insert(normalize_archive_path(&streams.entries[i].path), g);
            }
        }

        let layout = Gen4Layout {
            scenes,
            streams,
            groups,
            group_of,
        };
        let blob_hash = layout.blob_hash(&streams_bytes);
        let lip_groups = layout.groups.iter().filter(|g| g.lip().is_some()).count();

        info!(
            "Loaded Gen-4 archive {} ({} files, {} groups, {} with lip data) in {:.2?}",
            root.display(),
            files.len(),
            layout.groups.len(),
            lip_groups,
            start.elapsed()
        );

        Ok(LoadedArchive {
            files,
            layout: ArchiveLayout::Gen4(layout),
            blob_hash,
            warnings: Vec::new(),
        })
    }

    fn save(&self, archive: &LoadedArchive, dest: &Path, progress: ProgressCallback) -> Result<u64> {
        let ArchiveLayout::Gen4(layout) = &archive.layout else {
            return Err(layout_mismatch(Generation::Gen4, &archive.layout));
        };
        let root = output_root(dest);
        let files = &archive.files;
        let mut out = layout.clone();
        let total = layout.groups.len();

        let mut regions = Vec::with_capacity(total);
        for (g, group) in layout.groups.iter().enumerate() {
            let first = &layout.streams.entries[group.members()[0]];
            progress(&ArchiveProgress::with_file(
                ArchivePhase::WritingBlobs,
                g + 1,
                total,
                first.path.clone(),
            ));

            let audio = match *group {
                EntryGroup::Standalone { entry, .. } => {
                    let file = file_for(files, &layout.streams.entries[entry].path)?;
                    let target = &mut out.streams.entries[entry];
                    target.apply(&file.record);
                    target.data_size = file.payload().len() as u32;
                    file.payload().to_vec()
                }
                EntryGroup::Alias { sub1, sub2, .. } => {
                    let f1 = file_for(files, &layout.streams.entries[sub1].path)?;
                    let f2 = file_for(files, &layout.streams.entries[sub2].path)?;
                    let strides = alias::strides(&f1.record, &f2.record, first.data_offset)?;
                    for (i, file) in [(sub1, f1), (sub2, f2)] {
                        let target = &mut out.streams.entries[i];
                        target.apply(&file.record);
                        target.data_size = file.payload().len() as u32;
                    }
                    alias::interleave(f1.payload(), f2.payload(), strides)
                }
            };
            let region = match group.lip() {
                Some(lip) => lip.join(&audio, &first.path)?,
                None => audio,
            };
            regions.push(region);
        }

        let slots: Vec<BlobSlot<'_>> = layout
            .groups
            .iter()
            .zip(&regions)
            .map(|(group, region)| {
                let first = &layout.streams.entries[group.members()[0]];
                BlobSlot {
                    offset: first.data_offset - streams::HEADER_SIZE as u64,
                    size: u64::from(first.region_size),
                    data: region,
                }
            })
            .collect();
        let rebuilt = rebuild_blob(&layout.streams.data, &slots);

        // (old offset, path, new offset) of every entry, for re-pointing scene records
        let mut moved = Vec::with_capacity(out.streams.entries.len());
        for (g, group) in layout.groups.iter().enumerate() {
            let new_offset = rebuilt.offsets[g] + streams::HEADER_SIZE as u64;
            for i in group.members() {
                let old_offset = layout.streams.entries[i].data_offset;
                let entry = &mut out.streams.entries[i];
                entry.data_offset = new_offset;
                entry.region_size = regions[g].len() as u32;
                moved.push((old_offset, normalize_archive_path(&entry.path), new_offset));
            }
        }
        out.streams.data = rebuilt.bytes;

        for scene in &mut out.scenes {
            for record in scene
                .file
                .records
                .iter_mut()
                .filter(|r| r.placement == Placement::Streams)
            {
                let key = normalize_archive_path(&record.path);
                let old = u64::from(record.data_offset);
                let target = moved
                    .iter()
                    .find(|(o, p, _)| *o == old && *p == key)
                    .or_else(|| moved.iter().find(|(o, _, _)| *o == old));
                if let Some(&(_, _, new_offset)) = target {
                    record.data_offset = to_u32(new_offset, &key)?;
                }
            }
        }
        rebuild_scenes(&mut out.scenes, files)?;

        progress(&ArchiveProgress::new(ArchivePhase::WritingIndex, 1, 1));
        let streams_bytes = out.streams.to_bytes()?;
        write_file(&streams_path(&root), &streams_bytes)?;
        write_scenes(&root, &out.scenes)?;

        info!("Saved Gen-4 archive to {}", root.display());
        Ok(out.blob_hash(&streams_bytes))
    }

    fn lip_data<'a>(&self, layout: &'a ArchiveLayout, path: &str) -> Option<&'a LipData> {
        match layout {
            ArchiveLayout::Gen4(layout) => layout.lip(path),
            _ => None,
        }
    }
}
