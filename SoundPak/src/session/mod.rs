//! Archive session: one loaded archive and at most one background operation
//!
//! The session owns an immutable [`ArchiveState`] behind an `Arc`. Long
//! operations run on a worker thread against that snapshot and hand back a
//! replacement, which [`ArchiveSession::poll`] publishes in one step. Readers
//! never see a half-loaded or half-imported archive.
//!
//! ```no_run
//! use soundpak::formats::Generation;
//! use soundpak::session::{ArchiveSession, UnsavedChanges};
//! use soundpak::ToolConfig;
//!
//! let mut session = ArchiveSession::new(ToolConfig::load());
//! session.begin_load("game/sound".as_ref(), Generation::Gen23, UnsavedChanges::Cancel)?;
//! session.wait()?;
//! println!("{}", session.tree().map(|t| t.file_count()).unwrap_or(0));
//! # Ok::<(), soundpak::Error>(())
//! ```

pub mod batch;
pub mod export;
pub mod import;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};

use tracing::info;

use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::formats::{ArchiveLayout, Generation, LipData, LoadedArchive};
use crate::model::{ArchiveDirectory, AudioFile};
use crate::progress::{ArchiveProgress, SharedProgress};
use crate::utils::normalize_archive_path;

pub use batch::BatchReport;
pub use export::{ExportPolicy, ExportedFile, STANDARD_RATES, nearest_standard_rate};
pub use import::{ImportPolicy, ImportTarget, Replacement};
pub use worker::OperationOutcome;

use worker::{AfterSave, Completed, Operation, StateUpdate};

/// A loaded archive as published by the session
#[derive(Debug, Clone)]
pub struct ArchiveState {
    /// Path the archive was loaded from
    pub source: PathBuf,
    pub generation: Generation,
    pub archive: LoadedArchive,
    /// Snapshot id of the originality baseline in use
    pub baseline_root: u64,
    pub warnings: Vec<String>,
}

impl ArchiveState {
    /// Directory tree with per-file flags
    #[must_use]
    pub fn tree(&self) -> ArchiveDirectory {
        ArchiveDirectory::from_files(
            self.archive
                .files
                .values()
                .map(|f| (f.path.as_str(), f.flags())),
        )
    }

    /// The tree as pretty JSON
    pub fn tree_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.tree())?)
    }

    /// Any file modified since the last load or save
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.archive.files.values().any(|f| f.dirty)
    }

    /// Look up a file by archive path, in any spelling
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&AudioFile> {
        self.archive.files.get(&normalize_archive_path(path))
    }

    #[must_use]
    pub fn lip_data(&self, path: &str) -> Option<&LipData> {
        self.generation
            .parser()
            .lip_data(&self.archive.layout, &normalize_archive_path(path))
    }

    /// Whether `path` is a sub stream of a generation 4 alias group
    #[must_use]
    pub fn is_alias_member(&self, path: &str) -> bool {
        match &self.archive.layout {
            ArchiveLayout::Gen4(layout) => layout.is_alias_member(&normalize_archive_path(path)),
            _ => false,
        }
    }

    /// Private copy for an operation to modify before publishing
    pub(crate) fn working_copy(&self) -> Self {
        self.clone()
    }
}

/// Decision for unsaved changes before a destructive operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsavedChanges {
    /// Save to this path first
    Save(PathBuf),
    Discard,
    /// Abort the requested operation
    Cancel,
}

/// What a `begin_*` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Begin {
    /// A background operation was started; see [`ArchiveSession::poll`]
    Started,
    /// Nothing needed to run in the background
    Finished,
    /// Cancelled at the unsaved changes checkpoint
    Cancelled,
}

/// Orchestrates loading, importing, exporting and saving of one archive
#[derive(Debug)]
pub struct ArchiveSession {
    config: ToolConfig,
    state: Option<Arc<ArchiveState>>,
    pending: Option<Receiver<Completed>>,
    progress: SharedProgress,
}

impl ArchiveSession {
    #[must_use]
    pub fn new(config: ToolConfig) -> Self {
        Self {
            config,
            state: None,
            pending: None,
            progress: SharedProgress::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Replace the configuration used by later operations
    pub fn set_config(&mut self, config: ToolConfig) {
        self.config = config;
    }

    /// The published state; stays valid while an operation runs
    #[must_use]
    pub fn state(&self) -> Option<Arc<ArchiveState>> {
        self.state.clone()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_dirty())
    }

    #[must_use]
    pub fn tree(&self) -> Option<ArchiveDirectory> {
        self.state.as_ref().map(|s| s.tree())
    }

    /// Latest progress of the running operation
    #[must_use]
    pub fn progress(&self) -> ArchiveProgress {
        self.progress.get()
    }

    /// `(current, total, message)` for display
    #[must_use]
    pub fn status(&self) -> (usize, usize, String) {
        let p = self.progress.get();
        (p.current, p.total, p.message())
    }

    /// Load an archive, settling unsaved changes of the current one first
    pub fn begin_load(
        &mut self,
        source: &Path,
        generation: Generation,
        unsaved: UnsavedChanges,
    ) -> Result<Begin> {
        self.ensure_idle()?;
        let load = Operation::Load {
            source: source.to_path_buf(),
            generation,
        };
        let operation = if self.is_dirty() {
            match unsaved {
                UnsavedChanges::Cancel => return Ok(Begin::Cancelled),
                UnsavedChanges::Discard => load,
                UnsavedChanges::Save(dest) => Operation::Save {
                    dest,
                    then: AfterSave::Load {
                        source: source.to_path_buf(),
                        generation,
                    },
                },
            }
        } else {
            load
        };
        self.start(operation);
        Ok(Begin::Started)
    }

    /// Save to `dest` and continue with the saved archive
    pub fn begin_save(&mut self, dest: &Path) -> Result<Begin> {
        self.ensure_idle()?;
        self.ensure_loaded()?;
        self.start(Operation::Save {
            dest: dest.to_path_buf(),
            then: AfterSave::Reload,
        });
        Ok(Begin::Started)
    }

    /// Replace entries with external files.
    ///
    /// With `import_root`, each file's path below it names its archive entry;
    /// otherwise entries are matched by file name.
    pub fn begin_import(
        &mut self,
        files: Vec<PathBuf>,
        import_root: Option<PathBuf>,
        policy: ImportPolicy,
    ) -> Result<Begin> {
        self.ensure_idle()?;
        self.ensure_loaded()?;
        self.start(Operation::Import {
            files,
            import_root,
            policy,
        });
        Ok(Begin::Started)
    }

    /// Export `paths` (all files when `None`) below `dest`
    pub fn begin_export(
        &mut self,
        dest: &Path,
        paths: Option<Vec<String>>,
        policy: ExportPolicy,
    ) -> Result<Begin> {
        self.ensure_idle()?;
        self.ensure_loaded()?;
        let paths = paths.map(|p| p.iter().map(|s| normalize_archive_path(s)).collect());
        self.start(Operation::Export {
            dest: dest.to_path_buf(),
            paths,
            policy,
        });
        Ok(Begin::Started)
    }

    /// Drop the loaded archive, settling unsaved changes first
    pub fn close(&mut self, unsaved: UnsavedChanges) -> Result<Begin> {
        self.ensure_idle()?;
        if self.is_dirty() {
            match unsaved {
                UnsavedChanges::Cancel => return Ok(Begin::Cancelled),
                UnsavedChanges::Save(dest) => {
                    self.start(Operation::Save {
                        dest,
                        then: AfterSave::Close,
                    });
                    return Ok(Begin::Started);
                }
                UnsavedChanges::Discard => {}
            }
        }
        self.state = None;
        info!("Closed archive");
        Ok(Begin::Finished)
    }

    /// Publish the running operation's result if it has finished; never blocks
    pub fn poll(&mut self) -> Option<Result<OperationOutcome>> {
        let received = self.pending.as_ref()?.try_recv();
        match received {
            Ok(completed) => Some(self.finish(completed)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.pending = None;
                Some(Err(Error::WorkerLost))
            }
        }
    }

    /// Block until the running operation finishes
    pub fn wait(&mut self) -> Result<OperationOutcome> {
        let receiver = self.pending.as_ref().ok_or(Error::NoOperation)?;
        match receiver.recv() {
            Ok(completed) => self.finish(completed),
            Err(_) => {
                self.pending = None;
                Err(Error::WorkerLost)
            }
        }
    }

    /// Make the current content the originality baseline.
    ///
    /// Finishes with [`OperationOutcome::BaselineRegenerated`].
    pub fn begin_regenerate_baseline(&mut self) -> Result<Begin> {
        self.ensure_idle()?;
        self.ensure_loaded()?;
        self.start(Operation::Baseline);
        Ok(Begin::Started)
    }

    fn start(&mut self, operation: Operation) {
        self.progress.reset();
        self.pending = Some(worker::spawn(
            operation,
            self.state.clone(),
            self.config.clone(),
            self.progress.clone(),
        ));
    }

    fn finish(&mut self, completed: Completed) -> Result<OperationOutcome> {
        self.pending = None;
        match completed.state {
            StateUpdate::Keep => {}
            StateUpdate::Replace(state) => self.state = Some(state),
            StateUpdate::Clear => self.state = None,
        }
        completed.result
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_busy() {
            return Err(Error::OperationInProgress);
        }
        Ok(())
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.state.is_none() {
            return Err(Error::NotLoaded);
        }
        Ok(())
    }
}
