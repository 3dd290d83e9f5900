//! CLI command for exporting archive files

use std::path::Path;
use std::time::Instant;

use anyhow::bail;

use super::open;
use crate::cli::progress::{SPEAKER, print_batch, print_done, print_step, wait_for};
use crate::config::ToolConfig;
use crate::formats::Generation;
use crate::session::{ExportPolicy, OperationOutcome};

pub fn execute(
    source: &Path,
    destination: &Path,
    generation: Option<Generation>,
    files: &[String],
    playable: bool,
    no_lip: bool,
    quiet: bool,
    mut config: ToolConfig,
) -> anyhow::Result<()> {
    let start = Instant::now();
    if no_lip {
        config.export_lip = false;
    }
    let policy = if playable {
        ExportPolicy::Playable
    } else {
        config.export_policy
    };

    let mut session = open(source, generation, config, quiet)?;
    let paths = (!files.is_empty()).then(|| files.to_vec());
    if !quiet {
        print_step(
            1,
            1,
            SPEAKER,
            &format!("Exporting to {}...", destination.display()),
        );
    }
    session.begin_export(destination, paths, policy)?;

    let OperationOutcome::Exported(report) = wait_for(&mut session, quiet)? else {
        bail!("export finished without a report");
    };
    if !quiet {
        print_batch("Export", &report);
        print_done(start.elapsed());
    }
    if report.success_count == 0 && report.fail_count > 0 {
        bail!("no files were exported");
    }
    Ok(())
}
