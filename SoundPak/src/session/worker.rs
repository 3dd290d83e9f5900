//! Background execution of session operations
//!
//! Every operation runs on its own thread against an immutable snapshot of
//! the session state. Results, including any replacement state, travel back
//! over a channel and are published by the session in one step.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Instant;

use tracing::{info, warn};

use super::batch::{BatchReport, run_parallel};
use super::export::{ExportPolicy, export_file};
use super::import::{ImportPolicy, ImportTarget, Replacement, prepare_import, resolve_target};
use super::ArchiveState;
use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::formats::Generation;
use crate::originality::{
    OriginalityCache, attach_baseline, record_saved_blob, regenerate_baseline,
};
use crate::progress::{ArchivePhase, ArchiveProgress, ProgressCallback, SharedProgress};

/// What happens once a save has been written
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AfterSave {
    /// Continue editing the saved archive
    Reload,
    /// Load another archive
    Load {
        source: PathBuf,
        generation: Generation,
    },
    Close,
}

/// A long-running request
#[derive(Debug, Clone)]
pub(crate) enum Operation {
    Load {
        source: PathBuf,
        generation: Generation,
    },
    Save {
        dest: PathBuf,
        then: AfterSave,
    },
    Import {
        files: Vec<PathBuf>,
        import_root: Option<PathBuf>,
        policy: ImportPolicy,
    },
    Export {
        dest: PathBuf,
        /// Normalized archive paths; `None` exports everything
        paths: Option<Vec<String>>,
        policy: ExportPolicy,
    },
    /// Make the current content the originality baseline
    Baseline,
}

/// Result of a finished operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Loaded {
        source: PathBuf,
        files: usize,
        warnings: Vec<String>,
    },
    Saved {
        dest: PathBuf,
        blob_hash: u64,
        warnings: Vec<String>,
    },
    Imported(BatchReport),
    Exported(BatchReport),
    BaselineRegenerated {
        files: usize,
        warning: Option<String>,
    },
    Closed,
}

/// How the published session state changes
#[derive(Debug)]
pub(crate) enum StateUpdate {
    Keep,
    Replace(Arc<ArchiveState>),
    Clear,
}

#[derive(Debug)]
pub(crate) struct Completed {
    pub state: StateUpdate,
    pub result: Result<OperationOutcome>,
}

/// Run `operation` on a new thread
pub(crate) fn spawn(
    operation: Operation,
    snapshot: Option<Arc<ArchiveState>>,
    config: ToolConfig,
    progress: SharedProgress,
) -> Receiver<Completed> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let report = |p: &ArchiveProgress| progress.update(p);
        let completed = run(operation, snapshot.as_deref(), &config, &report);
        progress.update(&ArchiveProgress::new(ArchivePhase::Complete, 1, 1));
        // The receiver is gone when the session was dropped mid-operation
        let _ = tx.send(completed);
    });
    rx
}

fn run(
    operation: Operation,
    snapshot: Option<&ArchiveState>,
    config: &ToolConfig,
    progress: ProgressCallback,
) -> Completed {
    match operation {
        Operation::Load { source, generation } => {
            match load_state(&source, generation, config, progress) {
                Ok(state) => loaded(state),
                Err(e) => Completed {
                    state: StateUpdate::Clear,
                    result: Err(e),
                },
            }
        }
        Operation::Save { dest, then } => {
            let Some(state) = snapshot else {
                return not_loaded();
            };
            let (blob_hash, mut warnings) = match save_state(state, &dest, config, progress) {
                Ok(saved) => saved,
                Err(e) => {
                    return Completed {
                        state: StateUpdate::Keep,
                        result: Err(e),
                    };
                }
            };

            match then {
                AfterSave::Close => Completed {
                    state: StateUpdate::Clear,
                    result: Ok(OperationOutcome::Closed),
                },
                AfterSave::Load { source, generation } => {
                    match load_state(&source, generation, config, progress) {
                        Ok(state) => loaded(state),
                        Err(e) => Completed {
                            state: StateUpdate::Clear,
                            result: Err(e),
                        },
                    }
                }
                AfterSave::Reload => match load_state(&dest, state.generation, config, progress) {
                    Ok(reloaded) => {
                        warnings.extend(reloaded.warnings.iter().cloned());
                        Completed {
                            state: StateUpdate::Replace(Arc::new(reloaded)),
                            result: Ok(OperationOutcome::Saved {
                                dest,
                                blob_hash,
                                warnings,
                            }),
                        }
                    }
                    Err(e) => Completed {
                        state: StateUpdate::Clear,
                        result: Err(e),
                    },
                },
            }
        }
        Operation::Import {
            files,
            import_root,
            policy,
        } => {
            let Some(state) = snapshot else {
                return not_loaded();
            };
            let (updated, report) =
                import_files(state, &files, import_root.as_deref(), policy, config, progress);
            Completed {
                state: updated.map_or(StateUpdate::Keep, |s| StateUpdate::Replace(Arc::new(s))),
                result: Ok(OperationOutcome::Imported(report)),
            }
        }
        Operation::Export {
            dest,
            paths,
            policy,
        } => {
            let Some(state) = snapshot else {
                return not_loaded();
            };
            let report = export_files(state, &dest, paths, policy, config, progress);
            Completed {
                state: StateUpdate::Keep,
                result: Ok(OperationOutcome::Exported(report)),
            }
        }
        Operation::Baseline => {
            let Some(state) = snapshot else {
                return not_loaded();
            };
            let (updated, warning) = capture_baseline(state, config, progress);
            let files = updated.archive.files.len();
            Completed {
                state: StateUpdate::Replace(Arc::new(updated)),
                result: Ok(OperationOutcome::BaselineRegenerated { files, warning }),
            }
        }
    }
}

fn loaded(state: ArchiveState) -> Completed {
    let outcome = OperationOutcome::Loaded {
        source: state.source.clone(),
        files: state.archive.files.len(),
        warnings: state.warnings.clone(),
    };
    Completed {
        state: StateUpdate::Replace(Arc::new(state)),
        result: Ok(outcome),
    }
}

fn not_loaded() -> Completed {
    Completed {
        state: StateUpdate::Keep,
        result: Err(Error::NotLoaded),
    }
}

fn cache_for(generation: Generation, config: &ToolConfig) -> OriginalityCache {
    OriginalityCache::new(
        &config.cache_dir,
        generation.parser().cache_prefix(),
        config.hash_mode,
    )
}

/// Parse an archive and attach its originality baseline
pub(crate) fn load_state(
    source: &Path,
    generation: Generation,
    config: &ToolConfig,
    progress: ProgressCallback,
) -> Result<ArchiveState> {
    let start = Instant::now();
    let mut archive = generation
        .parser()
        .load(source, config.hash_mode, progress)?;

    progress(&ArchiveProgress::new(ArchivePhase::Baseline, 0, 1));
    let outcome = attach_baseline(
        &mut archive.files,
        &cache_for(generation, config),
        archive.blob_hash,
    );

    let mut warnings = archive.warnings.clone();
    warnings.extend(outcome.warning);
    info!(
        "Loaded {} archive {} ({} files) in {:.2?}",
        generation,
        source.display(),
        archive.files.len(),
        start.elapsed()
    );
    Ok(ArchiveState {
        source: source.to_path_buf(),
        generation,
        archive,
        baseline_root: outcome.root_id,
        warnings,
    })
}

/// Mark every entry of a working copy original and persist the new cache
fn capture_baseline(
    state: &ArchiveState,
    config: &ToolConfig,
    progress: ProgressCallback,
) -> (ArchiveState, Option<String>) {
    progress(&ArchiveProgress::new(ArchivePhase::Baseline, 0, 1));
    let mut copy = state.working_copy();
    let outcome = regenerate_baseline(
        &mut copy.archive.files,
        &cache_for(copy.generation, config),
        copy.archive.blob_hash,
    );
    copy.baseline_root = outcome.root_id;
    copy.warnings.extend(outcome.warning.clone());
    (copy, outcome.warning)
}

/// Write the archive and link the new blob to the session's baseline
fn save_state(
    state: &ArchiveState,
    dest: &Path,
    config: &ToolConfig,
    progress: ProgressCallback,
) -> Result<(u64, Vec<String>)> {
    let start = Instant::now();
    let blob_hash = state
        .generation
        .parser()
        .save(&state.archive, dest, progress)?;
    let warnings: Vec<String> = record_saved_blob(
        &cache_for(state.generation, config),
        blob_hash,
        state.baseline_root,
    )
    .into_iter()
    .collect();
    info!(
        "Saved {} to {} in {:.2?}",
        state.generation,
        dest.display(),
        start.elapsed()
    );
    Ok((blob_hash, warnings))
}

/// Import `files` into a working copy of `state`.
///
/// Returns the updated copy when at least one file was applied.
fn import_files(
    state: &ArchiveState,
    files: &[PathBuf],
    import_root: Option<&Path>,
    policy: ImportPolicy,
    config: &ToolConfig,
    progress: ProgressCallback,
) -> (Option<ArchiveState>, BatchReport) {
    let prepared = run_parallel(
        files,
        config.worker_threads,
        ArchivePhase::Importing,
        |path| path.display().to_string(),
        progress,
        |path| prepare_one(state, path, import_root, policy, config),
    );

    let mut report = BatchReport::default();
    let mut working = None;
    for (path, result) in files.iter().zip(prepared) {
        match result {
            Ok((target, replacement)) => {
                let copy = working.get_or_insert_with(|| state.working_copy());
                match copy.archive.files.get_mut(&target) {
                    Some(file) => {
                        file.replace(replacement.record, replacement.data, replacement.payload);
                        report.success(format!("{} -> {}", path.display(), target));
                    }
                    None => report.failure(format!("Failed {}: {target} vanished", path.display())),
                }
            }
            Err(e) => report.failure(format!("Failed {}: {}", path.display(), e)),
        }
    }
    info!(
        "Imported {} of {} files",
        report.success_count,
        report.total()
    );
    (working, report)
}

fn prepare_one(
    state: &ArchiveState,
    path: &Path,
    import_root: Option<&Path>,
    policy: ImportPolicy,
    config: &ToolConfig,
) -> Result<(String, Replacement)> {
    let files = &state.archive.files;
    let target = resolve_target(files, path, import_root)?;
    let file = files
        .get(&target)
        .ok_or_else(|| Error::FileNotFoundInArchive(target.clone()))?;
    let bytes = std::fs::read(path)?;
    let replacement = prepare_import(
        file,
        &bytes,
        policy,
        ImportTarget {
            generation: state.generation,
            alias_member: state.is_alias_member(&target),
        },
        config.hash_mode,
        &config.adpcm,
    )?;
    Ok((target, replacement))
}

fn export_files(
    state: &ArchiveState,
    dest: &Path,
    paths: Option<Vec<String>>,
    policy: ExportPolicy,
    config: &ToolConfig,
    progress: ProgressCallback,
) -> BatchReport {
    let paths = paths.unwrap_or_else(|| state.archive.files.keys().cloned().collect());
    let results = run_parallel(
        &paths,
        config.worker_threads,
        ArchivePhase::Exporting,
        String::clone,
        progress,
        |path| {
            let file = state
                .file(path)
                .ok_or_else(|| Error::FileNotFoundInArchive(path.clone()))?;
            let lip = if config.export_lip {
                state.lip_data(&file.path)
            } else {
                None
            };
            export_file(file, state.generation, policy, dest, lip)
        },
    );

    let mut report = BatchReport::default();
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok(exported) => report.success(exported.path.display().to_string()),
            Err(e) => report.failure(format!("Failed {path}: {e}")),
        }
    }
    if report.fail_count > 0 {
        warn!("{} of {} exports failed", report.fail_count, report.total());
    }
    info!("Exported {} files to {}", report.success_count, dest.display());
    report
}
