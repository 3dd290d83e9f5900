//! Progress reporting for long-running archive operations

use std::sync::{Arc, Mutex};

/// Progress callback handed to loaders, writers and batch operations
pub type ProgressCallback<'a> = &'a (dyn Fn(&ArchiveProgress) + Sync + Send);

/// Progress information during archive operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveProgress {
    /// Current operation phase
    pub phase: ArchivePhase,
    /// Current item number (1-indexed)
    pub current: usize,
    /// Total number of items
    pub total: usize,
    /// Current file being processed (if applicable)
    pub current_file: Option<String>,
}

impl ArchiveProgress {
    #[must_use]
    pub fn new(phase: ArchivePhase, current: usize, total: usize) -> Self {
        Self {
            phase,
            current,
            total,
            current_file: None,
        }
    }

    /// Create a progress update with a file/item name
    #[must_use]
    pub fn with_file(
        phase: ArchivePhase,
        current: usize,
        total: usize,
        file: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            current,
            total,
            current_file: Some(file.into()),
        }
    }

    /// Get the progress percentage (0.0 - 1.0)
    #[must_use]
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.current as f32 / self.total as f32
        }
    }

    /// Human readable status line
    #[must_use]
    pub fn message(&self) -> String {
        match &self.current_file {
            Some(file) => format!("{}: {file}", self.phase.as_str()),
            None => self.phase.as_str().to_string(),
        }
    }
}

impl Default for ArchiveProgress {
    fn default() -> Self {
        Self::new(ArchivePhase::Idle, 0, 0)
    }
}

/// Phase of an archive operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchivePhase {
    Idle,
    /// Parsing index files
    ReadingIndex,
    /// Splitting blobs into entries
    ReadingEntries,
    /// Hashing entry content
    Hashing,
    /// Restoring or capturing the originality baseline
    Baseline,
    Importing,
    Exporting,
    /// Rebuilding blobs for save
    WritingBlobs,
    /// Writing index files for save
    WritingIndex,
    Complete,
}

impl ArchivePhase {
    /// Get a human-readable description of this phase
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::ReadingIndex => "Reading index",
            Self::ReadingEntries => "Reading entries",
            Self::Hashing => "Hashing",
            Self::Baseline => "Checking originality",
            Self::Importing => "Importing",
            Self::Exporting => "Exporting",
            Self::WritingBlobs => "Writing blobs",
            Self::WritingIndex => "Writing index",
            Self::Complete => "Complete",
        }
    }
}

/// Callback that ignores every update
pub fn no_progress(_: &ArchiveProgress) {}

/// Latest progress of a background operation, written by the worker and
/// polled by the session owner.
#[derive(Debug, Clone, Default)]
pub struct SharedProgress {
    latest: Arc<Mutex<ArchiveProgress>>,
}

impl SharedProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update progress from background thread
    pub fn update(&self, progress: &ArchiveProgress) {
        if let Ok(mut latest) = self.latest.lock() {
            latest.clone_from(progress);
        }
    }

    /// Get a copy of the latest update
    #[must_use]
    pub fn get(&self) -> ArchiveProgress {
        self.latest.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        self.update(&ArchiveProgress::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_progress_across_threads() {
        let shared = SharedProgress::new();
        let writer = shared.clone();
        std::thread::spawn(move || {
            writer.update(&ArchiveProgress::with_file(ArchivePhase::Exporting, 2, 4, "a.wav"));
        })
        .join()
        .unwrap();

        let latest = shared.get();
        assert_eq!(latest.current, 2);
        assert!((latest.percentage() - 0.5).abs() < f32::EPSILON);
        assert_eq!(latest.message(), "Exporting: a.wav");

        shared.reset();
        assert_eq!(shared.get().phase, ArchivePhase::Idle);
    }
}
