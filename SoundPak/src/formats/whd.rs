//! WHD scene index (generations 2/3 and 4)
//!
//! ```text
//! header   16 bytes   file size, record count, two round-tripped words
//! records  40 bytes   one per stream, see WhdRecord
//! strings             NUL-terminated paths, kept verbatim
//! ```

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use tracing::debug;
use walkdir::WalkDir;
use xxhash_rust::xxh3::Xxh3;

use super::common::{read_cstr, read_sibling, slice_at, write_file};
use super::layout::{BlobSlot, rebuild_blob};
use crate::error::{Error, Result};
use crate::model::{AudioFile, AudioFormat, AudioRecord, HashMode, pcm16_byte_rate};
use crate::progress::{ArchivePhase, ArchiveProgress, ProgressCallback};
use crate::utils::normalize_archive_path;

pub const HEADER_SIZE: usize = 16;
pub const RECORD_SIZE: usize = 40;

/// Where a record's payload lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The scene's own `<scene>.wav`
    Scene,
    /// The archive-wide streams blob
    Streams,
}

impl Placement {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Placement::Scene),
            1 => Some(Placement::Streams),
            _ => None,
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Placement::Scene => 0,
            Placement::Streams => 1,
        }
    }
}

/// One 40-byte record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhdRecord {
    pub path_offset: u32,
    pub format: AudioFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub samples_per_block: u32,
    pub data_size: u32,
    pub data_size_uncompressed: u32,
    pub placement: Placement,
    pub data_offset: u32,
    pub unknown: u32,
    /// Path resolved from the string region
    pub path: String,
}

impl WhdRecord {
    /// Stream descriptor of this record (hash not computed)
    #[must_use]
    pub fn audio_record(&self) -> AudioRecord {
        let byte_rate = match self.format {
            AudioFormat::Pcm16 => pcm16_byte_rate(self.sample_rate, self.channels).unwrap_or(0),
            AudioFormat::ImaAdpcm if self.samples_per_block > 0 => {
                (u64::from(self.sample_rate) * u64::from(self.block_align)
                    / u64::from(self.samples_per_block)) as u32
            }
            _ => 0,
        };
        AudioRecord {
            format: self.format,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
            block_align: self.block_align,
            samples_per_block: self.samples_per_block,
            byte_rate,
            data_size: self.data_size,
            data_size_uncompressed: self.data_size_uncompressed,
            hash: 0,
        }
    }

    /// Copy the stream fields of `record` into this index record
    pub fn apply(&mut self, record: &AudioRecord) {
        self.format = record.format;
        self.channels = record.channels;
        self.sample_rate = record.sample_rate;
        self.bits_per_sample = record.bits_per_sample;
        self.block_align = record.block_align;
        self.samples_per_block = record.samples_per_block;
        self.data_size = record.data_size;
        self.data_size_uncompressed = record.data_size_uncompressed;
    }
}

/// A parsed scene index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhdFile {
    pub unknown0: u32,
    pub unknown1: u32,
    pub records: Vec<WhdRecord>,
    /// Bytes after the record table
    pub strings: Vec<u8>,
}

impl WhdFile {
    /// Parse a WHD; `name` is used in error messages
    pub fn parse(bytes: &[u8], name: &str) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedRecord {
            path: name.to_string(),
            reason,
        };

        let header = slice_at(bytes, 0, HEADER_SIZE as u64, "WHD header")?;
        let mut reader = Cursor::new(header);
        let file_size = reader.read_u32::<LittleEndian>()?;
        let record_count = reader.read_u32::<LittleEndian>()?;
        let unknown0 = reader.read_u32::<LittleEndian>()?;
        let unknown1 = reader.read_u32::<LittleEndian>()?;

        if file_size as usize != bytes.len() {
            return Err(malformed(format!(
                "header declares {file_size} bytes, file has {}",
                bytes.len()
            )));
        }

        let table_len = u64::from(record_count) * RECORD_SIZE as u64;
        let table = slice_at(bytes, HEADER_SIZE as u64, table_len, "WHD record table")?;
        let strings_start = HEADER_SIZE as u64 + table_len;

        let mut reader = Cursor::new(table);
        let mut records = Vec::with_capacity(record_count as usize);
        for i in 0..record_count {
            let path_offset = reader.read_u32::<LittleEndian>()?;
            let format_tag = reader.read_u16::<LittleEndian>()?;
            let channels = reader.read_u16::<LittleEndian>()?;
            let sample_rate = reader.read_u32::<LittleEndian>()?;
            let bits_per_sample = reader.read_u16::<LittleEndian>()?;
            let block_align = reader.read_u16::<LittleEndian>()?;
            let samples_per_block = reader.read_u32::<LittleEndian>()?;
            let data_size = reader.read_u32::<LittleEndian>()?;
            let data_size_uncompressed = reader.read_u32::<LittleEndian>()?;
            let placement = reader.read_u32::<LittleEndian>()?;
            let data_offset = reader.read_u32::<LittleEndian>()?;
            let unknown = reader.read_u32::<LittleEndian>()?;

            let format = AudioFormat::from_tag(format_tag)
                .ok_or_else(|| malformed(format!("record {i}: unknown format tag {format_tag:#06x}")))?;
            let placement = Placement::from_u32(placement)
                .ok_or_else(|| malformed(format!("record {i}: unknown placement {placement}")))?;
            if !(1..=2).contains(&channels) {
                return Err(malformed(format!("record {i}: {channels} channels")));
            }
            if pcm16_byte_rate(sample_rate, channels).is_none() {
                return Err(malformed(format!("record {i}: sample rate {sample_rate} Hz")));
            }
            if u64::from(path_offset) < strings_start {
                return Err(malformed(format!(
                    "record {i}: path offset {path_offset:#x} points into the record table"
                )));
            }
            let path = read_cstr(bytes, u64::from(path_offset), "WHD path")?;

            records.push(WhdRecord {
                path_offset,
                format,
                channels,
                sample_rate,
                bits_per_sample,
                block_align,
                samples_per_block,
                data_size,
                data_size_uncompressed,
                placement,
                data_offset,
                unknown,
                path,
            });
        }

        Ok(Self {
            unknown0,
            unknown1,
            records,
            strings: bytes[strings_start as usize..].to_vec(),
        })
    }

    /// Serialize; the string region is written back untouched
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let total = HEADER_SIZE + self.records.len() * RECORD_SIZE + self.strings.len();
        let mut out = Vec::with_capacity(total);
        out.write_u32::<LittleEndian>(total as u32)?;
        out.write_u32::<LittleEndian>(self.records.len() as u32)?;
        out.write_u32::<LittleEndian>(self.unknown0)?;
        out.write_u32::<LittleEndian>(self.unknown1)?;
        for record in &self.records {
            out.write_u32::<LittleEndian>(record.path_offset)?;
            out.write_u16::<LittleEndian>(record.format.tag())?;
            out.write_u16::<LittleEndian>(record.channels)?;
            out.write_u32::<LittleEndian>(record.sample_rate)?;
            out.write_u16::<LittleEndian>(record.bits_per_sample)?;
            out.write_u16::<LittleEndian>(record.block_align)?;
            out.write_u32::<LittleEndian>(record.samples_per_block)?;
            out.write_u32::<LittleEndian>(record.data_size)?;
            out.write_u32::<LittleEndian>(record.data_size_uncompressed)?;
            out.write_u32::<LittleEndian>(record.placement.as_u32())?;
            out.write_u32::<LittleEndian>(record.data_offset)?;
            out.write_u32::<LittleEndian>(record.unknown)?;
        }
        out.write_all(&self.strings)?;
        Ok(out)
    }
}

/// A WHD together with where it sits and its scene blob
#[derive(Debug, Clone)]
pub struct WhdScene {
    /// Path relative to the archive root
    pub relative: PathBuf,
    pub file: WhdFile,
    /// Contents of `<scene>.wav`, when present
    pub scene_blob: Option<Vec<u8>>,
}

impl WhdScene {
    /// Sibling blob path of this scene relative to the root
    #[must_use]
    pub fn scene_blob_path(&self) -> PathBuf {
        self.relative.with_extension("wav")
    }
}

/// Find all `.whd` files under `root`, sorted
pub fn find_whd_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("whd"))
        {
            found.push(entry.path().to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

/// Build a WHD from records and their paths, laying out the string region
#[must_use]
pub fn build_whd(records: Vec<(String, WhdRecord)>) -> WhdFile {
    let strings_start = HEADER_SIZE + records.len() * RECORD_SIZE;
    let mut strings = Vec::new();
    let mut out = Vec::with_capacity(records.len());
    for (path, mut record) in records {
        record.path_offset = (strings_start + strings.len()) as u32;
        strings.extend_from_slice(path.as_bytes());
        strings.push(0);
        record.path = path;
        out.push(record);
    }
    WhdFile {
        unknown0: 0,
        unknown1: 0,
        records: out,
        strings,
    }
}

/// Resolve the archive root for a source that may name a directory or a file inside it
#[must_use]
pub fn archive_root(source: &Path) -> PathBuf {
    if source.is_dir() {
        source.to_path_buf()
    } else {
        source.parent().map(Path::to_path_buf).unwrap_or_default()
    }
}

/// Resolve the directory an archive is written to; `dest` may name a directory
/// that does not exist yet, or an index or blob inside the target directory
#[must_use]
pub fn output_root(dest: &Path) -> PathBuf {
    let names_file = dest.is_file()
        || dest.extension().is_some_and(|ext| {
            matches!(ext.to_string_lossy().to_ascii_lowercase().as_str(), "whd" | "wav" | "str")
        });
    if names_file && !dest.is_dir() {
        dest.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        dest.to_path_buf()
    }
}

/// Read every scene index under `root` with its scene blob
pub fn load_scenes(root: &Path, progress: ProgressCallback) -> Result<Vec<WhdScene>> {
    let paths = find_whd_files(root)?;
    if paths.is_empty() {
        return Err(Error::MalformedRecord {
            path: root.display().to_string(),
            reason: "no .whd scene index found".to_string(),
        });
    }

    let total = paths.len();
    let mut scenes = Vec::with_capacity(total);
    for (i, path) in paths.iter().enumerate() {
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        progress(&ArchiveProgress::with_file(
            ArchivePhase::ReadingIndex,
            i + 1,
            total,
            relative.to_string_lossy().to_string(),
        ));

        let bytes = std::fs::read(path)?;
        let file = WhdFile::parse(&bytes, &relative.to_string_lossy())?;
        let blob_path = path.with_extension("wav");
        let needs_blob = file.records.iter().any(|r| r.placement == Placement::Scene);
        let scene_blob = if blob_path.is_file() || needs_blob {
            Some(read_sibling(&blob_path)?)
        } else {
            None
        };
        debug!("Scene {}: {} records", relative.display(), file.records.len());
        scenes.push(WhdScene {
            relative,
            file,
            scene_blob,
        });
    }
    Ok(scenes)
}

/// An entry found while walking an archive, before hashing
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub display_path: &'a str,
    pub record: AudioRecord,
    pub bytes: &'a [u8],
}

/// Records of all scenes stored in their scene blob
pub fn scene_candidates(scenes: &[WhdScene]) -> Result<Vec<Candidate<'_>>> {
    let mut out = Vec::new();
    for scene in scenes {
        let blob = scene.scene_blob.as_deref().unwrap_or_default();
        for record in scene.file.records.iter().filter(|r| r.placement == Placement::Scene) {
            out.push(Candidate {
                display_path: &record.path,
                record: record.audio_record(),
                bytes: slice_at(
                    blob,
                    u64::from(record.data_offset),
                    u64::from(record.data_size),
                    "scene blob record",
                )?,
            });
        }
    }
    Ok(out)
}

/// Register candidates under their normalized path and hash them in parallel.
///
/// Candidates naming the same path must agree on descriptor and bytes.
pub fn register_candidates(
    candidates: Vec<Candidate<'_>>,
    mode: HashMode,
    progress: ProgressCallback,
) -> Result<BTreeMap<String, AudioFile>> {
    let mut unique: BTreeMap<String, Candidate<'_>> = BTreeMap::new();
    for candidate in candidates {
        let key = normalize_archive_path(candidate.display_path);
        if let Some(existing) = unique.get(&key) {
            if existing.record != candidate.record || existing.bytes != candidate.bytes {
                return Err(Error::ConflictingRecords { path: key });
            }
            continue;
        }
        unique.insert(key, candidate);
    }

    let processed = AtomicUsize::new(0);
    let total = unique.len();
    let files: Vec<(String, AudioFile)> = unique
        .into_par_iter()
        .map(|(key, candidate)| {
            let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(&ArchiveProgress::with_file(
                ArchivePhase::Hashing,
                current,
                total,
                candidate.display_path,
            ));
            let len = candidate.bytes.len();
            let file = AudioFile::new(
                candidate.display_path,
                candidate.record,
                candidate.bytes.to_vec(),
                0..len,
                mode,
            );
            (key, file)
        })
        .collect();
    Ok(files.into_iter().collect())
}

/// Fold scene paths and scene blobs into a blob hash
pub fn hash_scenes(hasher: &mut Xxh3, scenes: &[WhdScene]) {
    for scene in scenes {
        hasher.update(scene.relative.to_string_lossy().replace('\\', "/").as_bytes());
        if let Some(blob) = &scene.scene_blob {
            hasher.update(blob);
        }
    }
}

/// Rebuild every scene blob from the current file contents and re-point the records
pub fn rebuild_scenes(scenes: &mut [WhdScene], files: &BTreeMap<String, AudioFile>) -> Result<()> {
    for scene in scenes {
        let indices: Vec<usize> = scene
            .file
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.placement == Placement::Scene)
            .map(|(i, _)| i)
            .collect();
        let Some(original) = &scene.scene_blob else {
            continue;
        };

        let mut slots = Vec::with_capacity(indices.len());
        for &i in &indices {
            let record = &scene.file.records[i];
            let key = normalize_archive_path(&record.path);
            let file = files
                .get(&key)
                .ok_or_else(|| Error::FileNotFoundInArchive(key.clone()))?;
            slots.push(BlobSlot {
                offset: u64::from(record.data_offset),
                size: u64::from(record.data_size),
                data: file.payload(),
            });
        }
        let rebuilt = rebuild_blob(original, &slots);

        for (slot, &i) in indices.iter().enumerate() {
            let key = normalize_archive_path(&scene.file.records[i].path);
            let file = files
                .get(&key)
                .ok_or_else(|| Error::FileNotFoundInArchive(key.clone()))?;
            let record = &mut scene.file.records[i];
            record.apply(&file.record);
            record.data_size = to_u32(file.payload().len() as u64, &key)?;
            record.data_offset = to_u32(rebuilt.offsets[slot], &key)?;
        }
        scene.scene_blob = Some(rebuilt.bytes);
    }
    Ok(())
}

/// Write every scene index and scene blob below `dest`
pub fn write_scenes(dest: &Path, scenes: &[WhdScene]) -> Result<()> {
    for scene in scenes {
        write_file(&dest.join(&scene.relative), &scene.file.to_bytes()?)?;
        if let Some(blob) = &scene.scene_blob {
            write_file(&dest.join(scene.scene_blob_path()), blob)?;
        }
    }
    Ok(())
}

/// Narrow an offset or size to the 32-bit WHD field
pub(crate) fn to_u32(value: u64, path: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::MalformedRecord {
        path: path.to_string(),
        reason: format!("{value:#x} does not fit a 32-bit index field"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(data_offset: u32, placement: Placement) -> WhdRecord {
        WhdRecord {
            path_offset: 0,
            format: AudioFormat::Pcm16,
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            block_align: 2,
            samples_per_block: 1,
            data_size: 8,
            data_size_uncompressed: 8,
            placement,
            data_offset,
            unknown: 0xCAFE,
            path: String::new(),
        }
    }

    #[test]
    fn test_round_trip() {
        let whd = build_whd(vec![
            ("scene\\a.wav".to_string(), record(0, Placement::Scene)),
            ("streams\\b.wav".to_string(), record(16, Placement::Streams)),
        ]);
        let bytes = whd.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 2 * RECORD_SIZE + 12 + 14);

        let parsed = WhdFile::parse(&bytes, "test.whd").unwrap();
        assert_eq!(parsed, whd);
        assert_eq!(parsed.records[1].path, "streams\\b.wav");
        assert_eq!(parsed.records[1].unknown, 0xCAFE);
    }

    #[test]
    fn test_rejects_bad_size() {
        let whd = build_whd(vec![("a.wav".to_string(), record(0, Placement::Scene))]);
        let mut bytes = whd.to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            WhdFile::parse(&bytes, "t"),
            Err(Error::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_table() {
        let mut bytes = vec![0u8; 16];
        bytes[0] = 16;
        bytes[4] = 3;
        assert!(matches!(
            WhdFile::parse(&bytes, "t"),
            Err(Error::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_audio_record_byte_rate() {
        let mut r = record(0, Placement::Scene);
        assert_eq!(r.audio_record().byte_rate, 44100);
        r.format = AudioFormat::ImaAdpcm;
        r.block_align = 512;
        r.samples_per_block = 1017;
        assert_eq!(r.audio_record().byte_rate, 22050 * 512 / 1017);
    }

    #[test]
    fn test_output_root() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("patched");
        assert_eq!(output_root(&fresh), fresh);
        assert_eq!(output_root(&fresh.join("streams.str")), fresh);
        assert_eq!(output_root(dir.path()), dir.path());
    }
}
