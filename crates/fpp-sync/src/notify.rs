//! Delivery hook for run summaries. The pipeline only knows this seam;
//! mail or chat delivery plugs in behind it.

use anyhow::Result;
use tracing::{info, warn};

use crate::report::RunSummary;

pub trait Notifier: Send + Sync {
    fn send_report(&self, summary: &RunSummary) -> Result<()>;
}

/// Discards summaries; the default for one-shot CLI runs.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn send_report(&self, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

/// Logs a one-line digest, matching what scheduled runs need in journals.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_report(&self, summary: &RunSummary) -> Result<()> {
        if summary.clean() {
            info!(
                run_id = %summary.run_id,
                downloaded = summary.files_downloaded,
                records = summary.records_loaded,
                "run finished cleanly"
            );
        } else {
            warn!(
                run_id = %summary.run_id,
                skipped = summary.skipped_files.len(),
                load_failures = summary.load_failures.len(),
                "run finished with pending items"
            );
        }
        Ok(())
    }
}
