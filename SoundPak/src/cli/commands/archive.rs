//! CLI commands that inspect a loaded archive

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::bail;
use console::style;

use super::open;
use crate::cli::progress::wait_for;
use crate::config::ToolConfig;
use crate::formats::Generation;
use crate::model::ArchiveDirectory;
use crate::session::{ArchiveState, OperationOutcome};

/// Show aggregate info about an archive
pub fn info(source: &Path, generation: Option<Generation>, config: ToolConfig) -> anyhow::Result<()> {
    let session = open(source, generation, config, true)?;
    let Some(state) = session.state() else {
        return Ok(());
    };
    let files = &state.archive.files;

    let mut by_format: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
    let mut duration = 0.0;
    for file in files.values() {
        let (count, size) = by_format.entry(file.record.format.as_str()).or_insert((0, 0));
        *count += 1;
        *size += file.data.len() as u64;
        duration += file.record.duration_secs();
    }
    let changed = files.values().filter(|f| !f.original).count();

    println!("Archive Information: {}", source.display());
    println!();
    println!("Generation: {}", state.generation);
    println!("Blob hash: {:016x}", state.archive.blob_hash);
    println!("Baseline: {:016x}", state.baseline_root);
    println!("Total files: {}", files.len());
    println!("Total duration: {duration:.1}s");
    println!("Changed since baseline: {changed}");
    println!();

    println!("Files by format:");
    for (format, (count, size)) in &by_format {
        println!("  {:10} {:>6} files  {:>10}", format, count, format_size(*size));
    }

    if !state.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &state.warnings {
            println!("  {warning}");
        }
    }

    Ok(())
}

/// Print the directory tree
pub fn tree(
    source: &Path,
    generation: Option<Generation>,
    json: bool,
    changed_only: bool,
    config: ToolConfig,
) -> anyhow::Result<()> {
    let session = open(source, generation, config, true)?;
    let Some(state) = session.state() else {
        return Ok(());
    };

    if json {
        println!("{}", state.tree_json()?);
    } else if changed_only {
        print_changed(&state);
    } else {
        print_directory(&state.tree(), 0);
    }
    Ok(())
}

/// Regenerate the originality baseline
pub fn baseline(source: &Path, generation: Option<Generation>, config: ToolConfig) -> anyhow::Result<()> {
    let mut session = open(source, generation, config, false)?;
    session.begin_regenerate_baseline()?;
    let OperationOutcome::BaselineRegenerated { files, warning } = wait_for(&mut session, false)?
    else {
        bail!("baseline finished without an outcome");
    };
    if let Some(warning) = warning {
        eprintln!("warning: {warning}");
    }
    println!("Baseline captured for {files} files");
    Ok(())
}

fn print_changed(state: &ArchiveState) {
    let changed: Vec<_> = state
        .archive
        .files
        .values()
        .filter(|f| !f.original)
        .collect();
    if changed.is_empty() {
        println!("All files match the baseline");
        return;
    }
    for file in changed {
        println!("  {}", file.display_path);
    }
}

fn print_directory(dir: &ArchiveDirectory, depth: usize) {
    let indent = "  ".repeat(depth);
    for (name, child) in &dir.directories {
        let label = format!("{name}/");
        if child.is_original() {
            println!("{indent}{label}");
        } else {
            println!("{indent}{}", style(label).yellow());
        }
        print_directory(child, depth + 1);
    }
    for (name, flags) in &dir.files {
        if flags.original {
            println!("{indent}{name}");
        } else {
            println!("{indent}{} {}", style(name).yellow(), style("(modified)").dim());
        }
    }
}

/// Format byte size for display
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
