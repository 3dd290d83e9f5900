//! CLI command for replacing archive files

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::bail;
use walkdir::WalkDir;

use super::open;
use crate::cli::progress::{DISK, TRUCK, print_batch, print_done, print_step, wait_for};
use crate::config::ToolConfig;
use crate::formats::Generation;
use crate::session::{ImportPolicy, OperationOutcome};

const AUDIO_EXTENSIONS: [&str; 2] = ["wav", "ogg"];

pub fn execute(
    source: &Path,
    inputs: &[PathBuf],
    generation: Option<Generation>,
    root: Option<&Path>,
    output: Option<&Path>,
    direct: bool,
    quiet: bool,
    config: ToolConfig,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let policy = if direct {
        ImportPolicy::Direct
    } else {
        config.import_policy
    };
    let (files, root) = collect_inputs(inputs, root)?;
    if files.is_empty() {
        bail!("no .wav or .ogg files to import");
    }

    let mut session = open(source, generation, config, quiet)?;
    if !quiet {
        print_step(1, 2, TRUCK, &format!("Importing {} files...", files.len()));
    }
    session.begin_import(files, root, policy)?;
    let OperationOutcome::Imported(report) = wait_for(&mut session, quiet)? else {
        bail!("import finished without a report");
    };
    if !quiet {
        print_batch("Import", &report);
    }
    if report.success_count == 0 {
        bail!("nothing was imported; the archive is unchanged");
    }

    let dest = output.unwrap_or(source);
    if !quiet {
        print_step(2, 2, DISK, &format!("Saving {}...", dest.display()));
    }
    session.begin_save(dest)?;
    if let OperationOutcome::Saved { warnings, .. } = wait_for(&mut session, quiet)? {
        for warning in warnings {
            eprintln!("warning: {warning}");
        }
    }
    if !quiet {
        print_done(start.elapsed());
    }
    Ok(())
}

/// Expand a single directory argument into its audio files, rooted at that directory
fn collect_inputs(
    inputs: &[PathBuf],
    root: Option<&Path>,
) -> anyhow::Result<(Vec<PathBuf>, Option<PathBuf>)> {
    let dir = match inputs {
        [dir] if dir.is_dir() => dir,
        _ => return Ok((inputs.to_vec(), root.map(Path::to_path_buf))),
    };

    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        let is_audio = entry.path().extension().is_some_and(|ext| {
            AUDIO_EXTENSIONS.contains(&ext.to_string_lossy().to_ascii_lowercase().as_str())
        });
        if entry.file_type().is_file() && is_audio {
            files.push(entry.into_path());
        }
    }
    files.sort();
    let root = root.map_or_else(|| dir.clone(), Path::to_path_buf);
    Ok((files, Some(root)))
}
