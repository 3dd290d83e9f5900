//! CLI progress display utilities

use std::thread;
use std::time::Duration;

use console::{Emoji, style};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};

use crate::error::Result;
use crate::session::{ArchiveSession, BatchReport, OperationOutcome};

/// Magnifying glass - for reading/scanning operations
pub static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
/// Floppy disk - for writing/saving operations
pub static DISK: Emoji<'_, '_> = Emoji("💾 ", "");
/// Speaker - for audio conversion
pub static SPEAKER: Emoji<'_, '_> = Emoji("🔊 ", "");
/// Truck - for batch/transport operations
pub static TRUCK: Emoji<'_, '_> = Emoji("🚚 ", "");
/// Sparkles - for completion
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

/// Print a step indicator: `[1/3] 🔍 Message...`
pub fn print_step(current: usize, total: usize, emoji: Emoji, msg: &str) {
    println!(
        "{} {}{}",
        style(format!("[{current}/{total}]")).bold().dim(),
        emoji,
        msg
    );
}

/// Print completion message: `✨ Done in 2s`
pub fn print_done(elapsed: Duration) {
    println!("{} Done in {}", SPARKLE, HumanDuration(elapsed));
}

/// Progress bar style for determinate progress
///
/// # Panics
/// Panics if the template string is invalid (this is a compile-time constant).
#[must_use]
pub fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
        .expect("valid template")
        .progress_chars("##-")
}

/// Poll `session` until its operation finishes, mirroring progress on a bar
pub fn wait_for(session: &mut ArchiveSession, quiet: bool) -> Result<OperationOutcome> {
    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        pb.set_style(bar_style());
        pb
    };

    loop {
        if let Some(result) = session.poll() {
            pb.finish_and_clear();
            return result;
        }
        let progress = session.progress();
        pb.set_length(progress.total as u64);
        pb.set_position(progress.current as u64);
        pb.set_message(progress.message());
        thread::sleep(Duration::from_millis(50));
    }
}

/// Print the outcome of a batch, listing failures
pub fn print_batch(title: &str, report: &BatchReport) {
    println!();
    println!("{title} complete:");
    println!("  Success: {}", report.success_count);
    println!("  Failed: {}", report.fail_count);

    if report.fail_count > 0 {
        println!();
        println!("Failures:");
        for msg in report.results.iter().filter(|m| m.starts_with("Failed")) {
            println!("  {msg}");
        }
    }
}
