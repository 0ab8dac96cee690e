//! Run summaries and their on-disk reports.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use fpp_core::DateRange;

/// Per `(fund, kind)` listing/download tally.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemOutcome {
    pub listed: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub window: DateRange,
    pub funds: usize,
    pub files_listed: usize,
    pub files_downloaded: usize,
    pub files_archived: usize,
    pub files_parsed: usize,
    pub records_loaded: usize,
    pub slices_written: usize,
    /// Keyed `"<fund display name>/<portal param>"`.
    pub item_outcomes: BTreeMap<String, ItemOutcome>,
    pub skipped_files: Vec<SkippedFile>,
    pub load_failures: Vec<String>,
}

impl RunSummary {
    pub fn clean(&self) -> bool {
        self.skipped_files.is_empty()
            && self.load_failures.is_empty()
            && self
                .item_outcomes
                .values()
                .all(|o| o.failed == 0 && o.error.is_none())
    }
}

/// Writes `summary.json` and a human `brief.md` under
/// `<reports_dir>/<run_id>/` and returns the run directory.
pub async fn write_reports(reports_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = reports_dir.join(summary.run_id.to_string());
    tokio::fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating report dir {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    tokio::fs::write(run_dir.join("summary.json"), json)
        .await
        .context("writing summary.json")?;

    tokio::fs::write(run_dir.join("brief.md"), render_brief(summary))
        .await
        .context("writing brief.md")?;
    Ok(run_dir)
}

fn render_brief(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Posições {} a {}\n\n",
        summary.window.start, summary.window.end
    ));
    out.push_str(&format!(
        "- status: {}\n- fundos: {}\n- arquivos listados: {}\n- baixados: {}\n- arquivados: {}\n- interpretados: {}\n- registros carregados: {}\n\n",
        if summary.clean() { "ok" } else { "com pendências" },
        summary.funds,
        summary.files_listed,
        summary.files_downloaded,
        summary.files_archived,
        summary.files_parsed,
        summary.records_loaded,
    ));
    if !summary.item_outcomes.is_empty() {
        out.push_str("## Por fundo e tipo\n\n");
        for (key, outcome) in &summary.item_outcomes {
            out.push_str(&format!(
                "- {key}: {} listados, {} baixados, {} falhas",
                outcome.listed, outcome.downloaded, outcome.failed
            ));
            if let Some(error) = &outcome.error {
                out.push_str(&format!(" ({error})"));
            }
            out.push('\n');
        }
        out.push('\n');
    }
    if !summary.skipped_files.is_empty() {
        out.push_str("## Arquivos ignorados\n\n");
        for skipped in &summary.skipped_files {
            out.push_str(&format!("- {}: {}\n", skipped.file_name, skipped.reason));
        }
        out.push('\n');
    }
    if !summary.load_failures.is_empty() {
        out.push_str("## Falhas de carga\n\n");
        for failure in &summary.load_failures {
            out.push_str(&format!("- {failure}\n"));
        }
    }
    out
}
