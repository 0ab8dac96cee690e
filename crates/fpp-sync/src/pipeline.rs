//! The run-once pipeline: registry sync, listing, bounded fetch, archive,
//! parse, load. Per-file failures travel in the summary; setup errors and
//! rejected credentials abort the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use fpp_core::{DateRange, FundIdentity, ReportKind};
use fpp_parsers::{parse_report, RawReport};
use fpp_portal::{
    AuthError, AuthSession, BackoffPolicy, CatalogError, FetchOrchestrator, FileCatalog,
    PortalFetcher, ReportArchive, ReportFetcher,
};
use fpp_store::{
    LoadBatch, LoadEngine, MigrationEngine, MigrationResult, PrimaryStore, Warehouse,
};

use crate::config::{load_fund_registry, PipelineConfig};
use crate::notify::{Notifier, NoopNotifier};
use crate::report::{write_reports, ItemOutcome, RunSummary, SkippedFile};

pub struct SyncPipeline {
    config: PipelineConfig,
    catalog: FileCatalog,
    fetcher: Arc<dyn ReportFetcher>,
    orchestrator: FetchOrchestrator,
    archive: ReportArchive,
    engine: LoadEngine,
    notifier: Box<dyn Notifier>,
}

impl SyncPipeline {
    pub async fn connect(config: PipelineConfig) -> Result<SyncPipeline> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building http client")?;
        let auth = Arc::new(AuthSession::new(
            client.clone(),
            &config.base_url,
            config.credentials.clone(),
        ));
        let catalog = FileCatalog::new(client.clone(), &config.base_url, Arc::clone(&auth));
        let fetcher: Arc<dyn ReportFetcher> =
            Arc::new(PortalFetcher::new(client, &config.base_url, auth));
        let orchestrator = FetchOrchestrator::new(config.workers, BackoffPolicy::default());
        let archive = ReportArchive::new(&config.archive_dir);
        let store = PrimaryStore::connect(&config.primary_db)
            .await
            .with_context(|| format!("opening primary store {}", config.primary_db))?;
        Ok(SyncPipeline {
            config,
            catalog,
            fetcher,
            orchestrator,
            archive,
            engine: LoadEngine::new(store),
            notifier: Box::new(NoopNotifier),
        })
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> SyncPipeline {
        self.notifier = notifier;
        self
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let window = self
            .config
            .effective_range(Utc::now().date_naive());
        info!(%run_id, start = %window.start, end = %window.end, "starting sync run");

        let funds = self.sync_fund_registry().await?;
        let mut item_outcomes: BTreeMap<String, ItemOutcome> = BTreeMap::new();
        let mut skipped_files = Vec::new();
        let mut work = Vec::new();

        for fund in &funds {
            for kind in &self.config.enabled_kinds {
                let key = format!("{}/{}", fund.display_name, kind.portal_param());
                match self.catalog.list_files(fund, *kind, window).await {
                    Ok(files) => {
                        item_outcomes.entry(key).or_default().listed = files.len();
                        work.extend(files);
                    }
                    // A rejected credential pair cannot recover within the
                    // run; no later listing or download could succeed.
                    Err(CatalogError::Auth(err @ AuthError::InvalidCredentials { .. })) => {
                        return Err(anyhow::Error::new(err).context("portal rejected the credentials, aborting run"));
                    }
                    Err(err) => {
                        warn!(fund = %fund.display_name, ?kind, error = %err, "listing failed");
                        item_outcomes.entry(key).or_default().error = Some(err.to_string());
                    }
                }
            }
        }
        let files_listed = work.len();

        let fetch_report = self
            .orchestrator
            .run(work, Arc::clone(&self.fetcher))
            .await;
        let (downloaded, fetch_failures) = fetch_report.downloaded();
        let files_downloaded = downloaded.len();
        for (file, error) in fetch_failures {
            if let Some(fund) = funds.iter().find(|f| f.local_id == file.fund_local_id) {
                let key = format!("{}/{}", fund.display_name, file.kind.portal_param());
                let outcome = item_outcomes.entry(key).or_default();
                outcome.failed += 1;
                outcome.error.get_or_insert(error.clone());
            }
            skipped_files.push(SkippedFile {
                file_name: file.file_name,
                reason: error,
            });
        }

        let mut files_archived = 0usize;
        let mut files_parsed = 0usize;
        let mut batch = LoadBatch::default();
        for fetched in downloaded {
            let fund = funds
                .iter()
                .find(|f| f.local_id == fetched.file.fund_local_id);
            let fund_name = fund.map(|f| f.display_name.as_str()).unwrap_or("fundo");
            if let Some(fund) = fund {
                let key = format!("{}/{}", fund.display_name, fetched.file.kind.portal_param());
                item_outcomes.entry(key).or_default().downloaded += 1;
            }
            match self
                .archive
                .store(&fetched.file, fund_name, &fetched.bytes)
                .await
            {
                Ok(_) => files_archived += 1,
                Err(err) => {
                    warn!(file = %fetched.file.file_name, error = %err, "archiving failed");
                    skipped_files.push(SkippedFile {
                        file_name: fetched.file.file_name.clone(),
                        reason: format!("arquivamento falhou: {err}"),
                    });
                    continue;
                }
            }
            if fetched.file.kind == ReportKind::Pdf {
                // Archived for the audit trail only.
                continue;
            }
            let raw = RawReport {
                file_name: fetched.file.file_name.clone(),
                fund_local_id: fetched.file.fund_local_id,
                bytes: fetched.bytes,
            };
            match parse_report(&raw) {
                Ok(parsed) => {
                    files_parsed += 1;
                    batch.records.extend(parsed.records);
                    batch.snapshots.extend(parsed.snapshot);
                }
                Err(err) => {
                    warn!(file = %raw.file_name, error = %err, "parse failed, file skipped");
                    skipped_files.push(SkippedFile {
                        file_name: raw.file_name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let load = self.engine.load(batch).await;
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            window,
            funds: funds.len(),
            files_listed,
            files_downloaded,
            files_archived,
            files_parsed,
            records_loaded: load.rows_written,
            slices_written: load.slices_written,
            item_outcomes,
            skipped_files,
            load_failures: load
                .failures
                .iter()
                .map(|f| format!("{} {}: {}", f.fund_local_id, f.reference_date, f.error))
                .collect(),
        };

        let run_dir = write_reports(&self.config.reports_dir, &summary).await?;
        info!(%run_id, dir = %run_dir.display(), "run reports written");
        if let Err(err) = self.notifier.send_report(&summary) {
            warn!(error = %err, "notifier failed");
        }
        Ok(summary)
    }

    /// Upserts every enabled registry entry and returns the identities
    /// with their store-assigned local ids.
    async fn sync_fund_registry(&self) -> Result<Vec<FundIdentity>> {
        let registry = load_fund_registry(&self.config.registry_path)?;
        let mut funds = Vec::new();
        for entry in registry.funds.into_iter().filter(|f| f.enabled) {
            let local_id = self
                .engine
                .store()
                .ensure_fund(&entry.remote_id, &entry.display_name, &entry.tax_id, entry.kind)
                .await
                .with_context(|| format!("registering fund {}", entry.display_name))?;
            funds.push(FundIdentity {
                remote_id: entry.remote_id,
                local_id,
                display_name: entry.display_name,
                tax_id: entry.tax_id,
                kind: entry.kind,
            });
        }
        Ok(funds)
    }
}

/// One-shot convenience used by the CLI and the scheduler.
pub async fn run_sync_once(config: PipelineConfig) -> Result<RunSummary> {
    SyncPipeline::connect(config).await?.run_once().await
}

/// Migrates primary-store data into the warehouse for `range` (or the
/// configured window, or everything when neither is set).
pub async fn run_migration(
    config: &PipelineConfig,
    range: Option<DateRange>,
) -> Result<Vec<MigrationResult>> {
    let range = range.or(config.date_range).unwrap_or(DateRange {
        start: chrono::NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
        end: Utc::now().date_naive(),
    });
    let primary = PrimaryStore::connect(&config.primary_db)
        .await
        .with_context(|| format!("opening primary store {}", config.primary_db))?;
    let warehouse = Warehouse::connect(&config.warehouse_db)
        .await
        .with_context(|| format!("opening warehouse {}", config.warehouse_db))?;
    let results = MigrationEngine::new(primary, warehouse)
        .migrate_all(range)
        .await?;
    Ok(results)
}
