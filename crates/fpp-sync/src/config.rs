//! Run configuration and the fund registry.
//!
//! All configuration is read once at startup into immutable structs; the
//! pipeline never consults the environment after construction.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use fpp_core::calendar::BusinessCalendar;
use fpp_core::{locale, DateRange, FundKind, ReportKind};
use fpp_portal::Credentials;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub primary_db: String,
    pub warehouse_db: String,
    pub archive_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub registry_path: PathBuf,
    pub enabled_kinds: Vec<ReportKind>,
    /// Explicit window; `None` targets the prior business day.
    pub date_range: Option<DateRange>,
    pub workers: usize,
    pub http_timeout_secs: u64,
    pub holidays: Vec<NaiveDate>,
    pub sync_cron: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_kind(token: &str) -> Result<ReportKind> {
    match token.trim().to_lowercase().as_str() {
        "pdf" => Ok(ReportKind::Pdf),
        "excel" => Ok(ReportKind::Excel),
        "xml_legacy" => Ok(ReportKind::XmlLegacy),
        "xml_current" | "xml" => Ok(ReportKind::XmlCurrent),
        other => anyhow::bail!("unknown report kind {other:?}"),
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<PipelineConfig> {
        let base_url = std::env::var("FPP_BASE_URL").context("FPP_BASE_URL is required")?;
        let credentials = Credentials {
            username: std::env::var("FPP_USERNAME").context("FPP_USERNAME is required")?,
            password: std::env::var("FPP_PASSWORD").context("FPP_PASSWORD is required")?,
        };

        let enabled_kinds = env_or("FPP_KINDS", "xml_current,xml_legacy,excel,pdf")
            .split(',')
            .filter(|token| !token.trim().is_empty())
            .map(parse_kind)
            .collect::<Result<Vec<_>>>()?;

        let date_range = match (std::env::var("FPP_DATE_FROM"), std::env::var("FPP_DATE_TO")) {
            (Ok(from), to) => {
                let start = locale::parse_date(&from)
                    .with_context(|| format!("FPP_DATE_FROM {from:?}"))?;
                let end = match to {
                    Ok(to) => locale::parse_date(&to).with_context(|| format!("FPP_DATE_TO {to:?}"))?,
                    Err(_) => start,
                };
                anyhow::ensure!(start <= end, "FPP_DATE_FROM is after FPP_DATE_TO");
                Some(DateRange { start, end })
            }
            _ => None,
        };

        let holidays = env_or("FPP_HOLIDAYS", "")
            .split(',')
            .filter(|token| !token.trim().is_empty())
            .map(|token| {
                locale::parse_date(token).with_context(|| format!("FPP_HOLIDAYS entry {token:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PipelineConfig {
            base_url,
            credentials,
            primary_db: env_or("FPP_PRIMARY_DB", "fpp_primary.db"),
            warehouse_db: env_or("FPP_WAREHOUSE_DB", "fpp_warehouse.db"),
            archive_dir: env_or("FPP_ARCHIVE_DIR", "archive").into(),
            reports_dir: env_or("FPP_REPORTS_DIR", "reports").into(),
            registry_path: env_or("FPP_FUNDS_FILE", "funds.yaml").into(),
            enabled_kinds,
            date_range,
            workers: env_or("FPP_WORKERS", "10").parse().context("FPP_WORKERS")?,
            http_timeout_secs: env_or("FPP_HTTP_TIMEOUT_SECS", "120")
                .parse()
                .context("FPP_HTTP_TIMEOUT_SECS")?,
            holidays,
            sync_cron: std::env::var("FPP_SYNC_CRON").ok(),
        })
    }

    /// The window a run targets: the explicit range when configured,
    /// otherwise the prior business day.
    pub fn effective_range(&self, today: NaiveDate) -> DateRange {
        match self.date_range {
            Some(range) => range,
            None => {
                let calendar = BusinessCalendar::new(self.holidays.iter().copied());
                DateRange::single(calendar.prior_business_day(today))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundRegistry {
    pub funds: Vec<FundEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundEntry {
    pub remote_id: String,
    pub display_name: String,
    pub tax_id: String,
    pub kind: FundKind,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

pub fn load_fund_registry(path: &Path) -> Result<FundRegistry> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading fund registry {}", path.display()))?;
    let registry: FundRegistry = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing fund registry {}", path.display()))?;
    anyhow::ensure!(!registry.funds.is_empty(), "fund registry lists no funds");
    Ok(registry)
}
