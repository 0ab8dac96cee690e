//! Pipeline orchestration: configuration, the run-once sync, migration
//! driver, run reports, notification hook and the optional scheduler.

pub mod config;
pub mod notify;
pub mod pipeline;
pub mod report;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const CRATE_NAME: &str = "fpp-sync";

pub use config::{load_fund_registry, FundEntry, FundRegistry, PipelineConfig};
pub use notify::{LogNotifier, NoopNotifier, Notifier};
pub use pipeline::{run_migration, run_sync_once, SyncPipeline};
pub use report::{ItemOutcome, RunSummary, SkippedFile};

/// Builds a cron-driven scheduler repeating `run_sync_once` when
/// `sync_cron` is configured; `None` means one-shot operation.
pub async fn maybe_build_scheduler(config: &PipelineConfig) -> Result<Option<JobScheduler>> {
    let Some(cron) = config.sync_cron.clone() else {
        return Ok(None);
    };
    let scheduler = JobScheduler::new().await.context("creating scheduler")?;
    let job_config = config.clone();
    let job = Job::new_async(cron.as_str(), move |_id, _lock| {
        let config = job_config.clone();
        Box::pin(async move {
            match pipeline::run_sync_once(config).await {
                Ok(summary) => info!(run_id = %summary.run_id, "scheduled run finished"),
                Err(err) => error!(error = %err, "scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("invalid cron expression {cron:?}"))?;
    scheduler.add(job).await.context("registering sync job")?;
    Ok(Some(scheduler))
}
