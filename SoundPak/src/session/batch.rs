//! Parallel batch execution for imports and exports

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::warn;

use crate::progress::{ArchivePhase, ArchiveProgress, ProgressCallback};

/// Summary of a batch operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of successful operations
    pub success_count: usize,
    /// Number of failed operations
    pub fail_count: usize,
    /// Messages for each item processed
    pub results: Vec<String>,
}

impl BatchReport {
    pub fn success(&mut self, message: String) {
        self.success_count += 1;
        self.results.push(message);
    }

    pub fn failure(&mut self, message: String) {
        warn!("{}", message);
        self.fail_count += 1;
        self.results.push(message);
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.success_count + self.fail_count
    }
}

/// Run `work` over `items` in parallel, keeping input order in the output.
///
/// With `threads` set, a dedicated pool of that size is used; otherwise the
/// global rayon pool.
pub fn run_parallel<T, R, F>(
    items: &[T],
    threads: Option<usize>,
    phase: ArchivePhase,
    label: impl Fn(&T) -> String + Sync,
    progress: ProgressCallback,
    work: F,
) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    let processed = AtomicUsize::new(0);
    let total = items.len();
    let run = || {
        items
            .par_iter()
            .map(|item| {
                let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
                progress(&ArchiveProgress::with_file(phase, current, total, label(item)));
                work(item)
            })
            .collect()
    };

    match threads.map(|n| rayon::ThreadPoolBuilder::new().num_threads(n).build()) {
        Some(Ok(pool)) => pool.install(run),
        Some(Err(e)) => {
            warn!("Falling back to the global thread pool: {}", e);
            run()
        }
        None => run(),
    }
}
