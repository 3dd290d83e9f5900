//! Generation 1: text index plus one concatenated blob
//!
//! `<name>.idx` lists one entry per line:
//!
//! ```text
//! <size> <month> <day> <time> <path with optional spaces>
//! ```
//!
//! `<name>.dat` holds the entries back to back in index order. Every entry is
//! a complete WAV or Ogg file; entries that are not audio are carried along
//! untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::common::{read_sibling, write_file};
use super::{ArchiveLayout, ArchiveParser, Generation, LoadedArchive, layout_mismatch};
use crate::codec::detect_header;
use crate::error::{Error, Result};
use crate::model::{AudioFile, HashMode, blob_hash};
use crate::progress::{ArchivePhase, ArchiveProgress, ProgressCallback};
use crate::utils::normalize_archive_path;

/// One line of the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub size: u64,
    pub month: String,
    pub day: String,
    pub time: String,
    /// Path as written in the index
    pub path: String,
    /// The line exactly as read, reused when the entry is unchanged
    pub raw: String,
    /// Normalized key of the registered audio file; `None` for opaque entries
    pub key: Option<String>,
}

impl IndexEntry {
    fn format_line(&self, size: u64) -> String {
        let trimmed = self.raw.trim_start();
        let indent = self.raw.len() - trimmed.len();
        let width = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        format!(
            "{:indent$}{size:>width$} {} {} {} {}",
            "", self.month, self.day, self.time, self.path
        )
    }
}

/// Write-back state of a Gen-1 archive
#[derive(Debug, Clone)]
pub struct Gen1Layout {
    pub entries: Vec<IndexEntry>,
    /// Bytes of entries not registered as audio, by entry index
    pub opaque: BTreeMap<usize, Vec<u8>>,
    pub line_ending: &'static str,
    pub trailing_newline: bool,
}

/// Paths of the index and blob for any of the two files
#[must_use]
pub fn archive_paths(source: &Path) -> (PathBuf, PathBuf) {
    (source.with_extension("idx"), source.with_extension("dat"))
}

fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

/// Parse the index text
pub fn parse_index(text: &str) -> Result<(Vec<IndexEntry>, &'static str, bool)> {
    let line_ending = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing_newline = text.ends_with('\n');

    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let invalid = |reason: &str| Error::InvalidIndexLine {
            line: number + 1,
            reason: reason.to_string(),
        };

        let (size, rest) = next_token(line).ok_or_else(|| invalid("missing size"))?;
        let size = size
            .parse::<u64>()
            .map_err(|_| invalid(&format!("size '{size}' is not a number")))?;
        let (month, rest) = next_token(rest).ok_or_else(|| invalid("missing month"))?;
        let (day, rest) = next_token(rest).ok_or_else(|| invalid("missing day"))?;
        let (time, rest) = next_token(rest).ok_or_else(|| invalid("missing time"))?;
        let path = rest.trim();
        if path.is_empty() {
            return Err(invalid("missing path"));
        }

        entries.push(IndexEntry {
            size,
            month: month.to_string(),
            day: day.to_string(),
            time: time.to_string(),
            path: path.to_string(),
            raw: line.to_string(),
            key: None,
        });
    }
    Ok((entries, line_ending, trailing_newline))
}

/// Generation 1 parser
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen1Parser;

impl ArchiveParser for Gen1Parser {
    fn generation(&self) -> Generation {
        Generation::Gen1
    }

    fn load(&self, source: &Path, mode: HashMode, progress: ProgressCallback) -> Result<LoadedArchive> {
        let start = Instant::now();
        let (idx_path, dat_path) = archive_paths(source);

        progress(&ArchiveProgress::new(ArchivePhase::ReadingIndex, 0, 1));
        let text = String::from_utf8_lossy(&read_sibling(&idx_path)?).into_owned();
        let (mut entries, line_ending, trailing_newline) = parse_index(&text)?;
        let blob = read_sibling(&dat_path)?;

        let actual = blob.len() as u64;
        let declared = entries
            .iter()
            .try_fold(0u64, |sum, e| sum.checked_add(e.size))
            .ok_or(Error::BlobSizeMismatch {
                declared: u64::MAX,
                actual,
            })?;
        if declared != actual {
            return Err(Error::BlobSizeMismatch { declared, actual });
        }

        let mut slices = Vec::with_capacity(entries.len());
        let mut offset = 0usize;
        for entry in &entries {
            let size = entry.size as usize;
            slices.push(&blob[offset..offset + size]);
            offset += size;
        }

        let total = entries.len();
        let parsed: Vec<Option<AudioFile>> = entries
            .par_iter()
            .zip(slices.par_iter())
            .enumerate()
            .map(|(i, (entry, bytes))| {
                progress(&ArchiveProgress::with_file(
                    ArchivePhase::Hashing,
                    i + 1,
                    total,
                    entry.path.clone(),
                ));
                let header = detect_header(bytes)?;
                Some(AudioFile::new(
                    &entry.path,
                    header.record,
                    bytes.to_vec(),
                    header.data,
                    mode,
                ))
            })
            .collect();

        let mut files: BTreeMap<String, AudioFile> = BTreeMap::new();
        let mut opaque = BTreeMap::new();
        let mut warnings = Vec::new();
        for (i, (entry, file)) in entries.iter_mut().zip(parsed).enumerate() {
            let Some(file) = file else {
                warn!("Keeping non-audio entry {} as opaque bytes", entry.path);
                warnings.push(format!("{} is not an audio stream and is kept verbatim", entry.path));
                opaque.insert(i, slices[i].to_vec());
                continue;
            };
            let key = file.path.clone();
            if let Some(existing) = files.get(&key) {
                if existing.data != file.data {
                    return Err(Error::ConflictingRecords { path: key });
                }
            } else {
                files.insert(key.clone(), file);
            }
            entry.key = Some(key);
        }

        info!(
            "Loaded Gen-1 archive {} ({} audio, {} opaque) in {:.2?}",
            idx_path.display(),
            files.len(),
            opaque.len(),
            start.elapsed()
        );

        Ok(LoadedArchive {
            files,
            layout: ArchiveLayout::Gen1(Gen1Layout {
                entries,
                opaque,
                line_ending,
                trailing_newline,
            }),
            blob_hash: blob_hash(&blob),
            warnings,
        })
    }

    fn save(&self, archive: &LoadedArchive, dest: &Path, progress: ProgressCallback) -> Result<u64> {
        let ArchiveLayout::Gen1(layout) = &archive.layout else {
            return Err(layout_mismatch(Generation::Gen1, &archive.layout));
        };
        let (idx_path, dat_path) = archive_paths(dest);
        let stamp = chrono::Local::now().format("%b %d %H:%M").to_string();
        let mut stamp_parts = stamp.split(' ');
        let (month, day, time) = (
            stamp_parts.next().unwrap_or_default().to_string(),
            stamp_parts.next().unwrap_or_default().to_string(),
            stamp_parts.next().unwrap_or_default().to_string(),
        );

        let total = layout.entries.len();
        let mut blob = Vec::new();
        let mut lines = Vec::with_capacity(total);
        for (i, entry) in layout.entries.iter().enumerate() {
            progress(&ArchiveProgress::with_file(
                ArchivePhase::WritingBlobs,
                i + 1,
                total,
                entry.path.clone(),
            ));

            let (bytes, changed) = match &entry.key {
                Some(key) => {
                    let file = archive
                        .files
                        .get(key)
                        .ok_or_else(|| Error::FileNotFoundInArchive(key.clone()))?;
                    (file.data.as_slice(), file.dirty)
                }
                None => {
                    let bytes = layout.opaque.get(&i).ok_or_else(|| Error::MalformedRecord {
                        path: entry.path.clone(),
                        reason: "opaque entry lost its bytes".to_string(),
                    })?;
                    (bytes.as_slice(), false)
                }
            };
            blob.extend_from_slice(bytes);

            let size = bytes.len() as u64;
            if changed {
                let restamped = IndexEntry {
                    month: month.clone(),
                    day: day.clone(),
                    time: time.clone(),
                    ..entry.clone()
                };
                lines.push(restamped.format_line(size));
            } else if size != entry.size {
                lines.push(entry.format_line(size));
            } else {
                lines.push(entry.raw.clone());
            }
        }

        let mut text = lines.join(layout.line_ending);
        if layout.trailing_newline {
            text.push_str(layout.line_ending);
        }

        progress(&ArchiveProgress::new(ArchivePhase::WritingIndex, 1, 1));
        write_file(&dat_path, &blob)?;
        write_file(&idx_path, text.as_bytes())?;
        debug!("Wrote {} ({} bytes)", dat_path.display(), blob.len());

        Ok(blob_hash(&blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index() {
        let text = "  100 Jan 01 12:00 sfx/door open.wav\r\n50 Feb 2 13:30 music\\theme.ogg\r\n";
        let (entries, ending, trailing) = parse_index(text).unwrap();
        assert_eq!(ending, "\r\n");
        assert!(trailing);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].size, 100);
        assert_eq!(entries[0].path, "sfx/door open.wav");
        assert_eq!(entries[1].month, "Feb");
        assert_eq!(entries[1].path, "music\\theme.ogg");
    }

    #[test]
    fn test_parse_index_errors() {
        assert!(matches!(
            parse_index("abc Jan 01 12:00 x.wav"),
            Err(Error::InvalidIndexLine { line: 1, .. })
        ));
        assert!(matches!(
            parse_index("\n10 Jan 01 12:00\n"),
            Err(Error::InvalidIndexLine { line: 2, .. })
        ));
    }

    #[test]
    fn test_format_line_keeps_columns() {
        let (entries, _, _) = parse_index("   42 Jan 01 12:00 a.wav").unwrap();
        assert_eq!(entries[0].format_line(7), "    7 Jan 01 12:00 a.wav");
    }

    #[test]
    fn test_overflowing_sizes_fail_load() {
        let dir = tempfile::tempdir().unwrap();
        let idx = dir.path().join("sfx.idx");
        let index = format!(
            "{} Jan 01 12:00 a.wav\n{} Jan 01 12:00 b.wav\n",
            u64::MAX,
            2
        );
        std::fs::write(&idx, index).unwrap();
        std::fs::write(dir.path().join("sfx.dat"), [0u8; 4]).unwrap();

        let err = Gen1Parser
            .load(&idx, HashMode::Direct, &crate::progress::no_progress)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::BlobSizeMismatch {
                declared: u64::MAX,
                actual: 4
            }
        ));
    }
}
