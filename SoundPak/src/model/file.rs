//! One audio entry of a loaded archive

use std::ops::Range;

use super::hash::{HashMode, analyze};
use super::tree::FileFlags;
use super::AudioRecord;

/// An audio stream registered under a normalized archive path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    /// Normalized (lowercase, forward slash) archive path
    pub path: String,
    /// Path as spelled by the index it came from
    pub display_path: String,
    /// Current descriptor
    pub record: AudioRecord,
    /// Baseline descriptor from the originality cache
    pub original_record: AudioRecord,
    /// Bytes as stored in the archive
    pub data: Vec<u8>,
    /// Sample payload within `data`; the whole buffer except for Gen-1 files
    pub payload: Range<usize>,
    pub dirty: bool,
    pub original: bool,
}

impl AudioFile {
    /// Register a freshly parsed stream, hashing it under `mode`
    #[must_use]
    pub fn new(
        display_path: &str,
        record: AudioRecord,
        data: Vec<u8>,
        payload: Range<usize>,
        mode: HashMode,
    ) -> Self {
        let record = analyze(record, &data[payload.clone()], mode);
        Self {
            path: crate::utils::normalize_archive_path(display_path),
            display_path: display_path.to_string(),
            record,
            original_record: record,
            data,
            payload,
            dirty: false,
            original: true,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[self.payload.clone()]
    }

    /// Swap in new content; the record must already carry its hash
    pub fn replace(&mut self, record: AudioRecord, data: Vec<u8>, payload: Range<usize>) {
        self.record = record;
        self.data = data;
        self.payload = payload;
        self.refresh_flags();
    }

    /// Recompute `original`; `dirty` sticks until [`AudioFile::mark_clean`]
    pub fn refresh_flags(&mut self) {
        self.original = self.original_record.hash == self.record.hash;
        self.dirty |= !self.original;
    }

    /// Accept a baseline record and clear dirtiness
    pub fn set_baseline(&mut self, original: AudioRecord) {
        self.original_record = original;
        self.original = original.hash == self.record.hash;
        self.dirty = false;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    #[must_use]
    pub fn flags(&self) -> FileFlags {
        FileFlags {
            dirty: self.dirty,
            original: self.original,
        }
    }
}
