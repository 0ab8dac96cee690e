//! Bounded-concurrency download orchestration with retry and backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info_span, warn, Instrument};

use fpp_core::ReportFile;

use crate::auth::{AuthError, AuthSession};
use crate::ApiErrorBody;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited fetching {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },
    #[error("server error {status} fetching {url}")]
    Server { status: u16, url: String },
    #[error("request denied with status {status} fetching {url}: {detail}")]
    Denied {
        status: u16,
        url: String,
        detail: String,
    },
    #[error("timeout fetching {url}")]
    Timeout { url: String },
    #[error("transport error fetching {url}: {detail}")]
    Transport { url: String, detail: String },
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl FetchError {
    /// Whether another attempt may succeed. Auth denials and client errors
    /// other than 429 are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::RateLimited { .. }
            | FetchError::Server { .. }
            | FetchError::Timeout { .. }
            | FetchError::Transport { .. } => true,
            FetchError::Denied { .. } | FetchError::Auth(_) => false,
        }
    }

    /// Server-suggested minimum wait, when one was sent.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Exponential backoff schedule between attempts on the same item.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Extra attempts after the first; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retrying after failed attempt number `attempt`
    /// (zero-based): base doubled per attempt, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter {
            let scale = 1.0 + (rand::random::<f64>() - 0.5) * 0.5;
            delay.mul_f64(scale).min(self.max_delay)
        } else {
            delay
        }
    }

    /// Backoff delay floored by the server's Retry-After hint.
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = self.delay_for_attempt(attempt);
        match hint {
            Some(hint) => computed.max(hint),
            None => computed,
        }
    }
}

/// One download attempt. Production goes through [`PortalFetcher`]; tests
/// substitute doubles to observe attempt counts and concurrency.
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    async fn fetch(&self, file: &ReportFile) -> Result<Vec<u8>, FetchError>;
}

/// Authenticated single-attempt fetcher against the portal download
/// endpoint. Token validity is re-checked before every attempt, so a token
/// expiring mid-run only costs one refresh.
pub struct PortalFetcher {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<AuthSession>,
}

impl PortalFetcher {
    pub fn new(client: reqwest::Client, base_url: &str, auth: Arc<AuthSession>) -> PortalFetcher {
        PortalFetcher {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }
}

#[async_trait]
impl ReportFetcher for PortalFetcher {
    async fn fetch(&self, file: &ReportFile) -> Result<Vec<u8>, FetchError> {
        let token = self.auth.ensure_valid().await?;
        let url = format!(
            "{}/api/v1/fundos-posicao/{}/arquivos/{}/download",
            self.base_url, file.fund_remote_id, file.remote_id
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| classify_transport(&url, err))?;
        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(response.headers());
            return Err(FetchError::RateLimited { url, retry_after });
        }
        if status.is_server_error() {
            return Err(FetchError::Server {
                status: status.as_u16(),
                url,
            });
        }
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let detail = ApiErrorBody::summarize(&body)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(FetchError::Denied {
                status: status.as_u16(),
                url,
                detail,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| classify_transport(&url, err))?;
        Ok(bytes.to_vec())
    }
}

fn classify_transport(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            detail: err.to_string(),
        }
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug)]
pub struct FetchedFile {
    pub file: ReportFile,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Downloaded(FetchedFile),
    Failed {
        file: ReportFile,
        attempts: u32,
        error: String,
    },
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub outcomes: Vec<FetchOutcome>,
}

impl FetchReport {
    pub fn downloaded(self) -> (Vec<FetchedFile>, Vec<(ReportFile, String)>) {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for outcome in self.outcomes {
            match outcome {
                FetchOutcome::Downloaded(file) => ok.push(file),
                FetchOutcome::Failed { file, error, .. } => failed.push((file, error)),
            }
        }
        (ok, failed)
    }

    pub fn downloaded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FetchOutcome::Downloaded(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.downloaded_count()
    }
}

/// Runs a batch of downloads through a fixed worker pool. Each item holds
/// one permit for its whole attempt sequence, so at most `workers` downloads
/// are in flight at any instant.
pub struct FetchOrchestrator {
    workers: usize,
    backoff: BackoffPolicy,
}

impl FetchOrchestrator {
    pub const DEFAULT_WORKERS: usize = 10;

    pub fn new(workers: usize, backoff: BackoffPolicy) -> FetchOrchestrator {
        FetchOrchestrator {
            workers: workers.max(1),
            backoff,
        }
    }

    pub async fn run(
        &self,
        files: Vec<ReportFile>,
        fetcher: Arc<dyn ReportFetcher>,
    ) -> FetchReport {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for file in files {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = Arc::clone(&fetcher);
            let backoff = self.backoff;
            tasks.spawn(async move {
                // Closing the semaphore is not part of this flow, so a
                // failed acquire cannot happen while the pool is alive.
                let _permit = semaphore.acquire_owned().await;
                fetch_with_retry(&file, fetcher.as_ref(), &backoff).await
            });
        }

        let mut report = FetchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => warn!(error = %err, "download task panicked"),
            }
        }
        report
    }
}

async fn fetch_with_retry(
    file: &ReportFile,
    fetcher: &dyn ReportFetcher,
    backoff: &BackoffPolicy,
) -> FetchOutcome {
    let total = backoff.total_attempts();
    let mut last_error = String::new();
    for attempt in 0..total {
        let span = info_span!(
            "fetch_report",
            remote_id = %file.remote_id,
            kind = ?file.kind,
            attempt
        );
        match fetcher.fetch(file).instrument(span).await {
            Ok(bytes) => {
                return FetchOutcome::Downloaded(FetchedFile {
                    file: file.clone(),
                    bytes,
                });
            }
            Err(err) => {
                let retryable = err.is_retryable();
                let hint = err.retry_after();
                last_error = err.to_string();
                if !retryable {
                    return FetchOutcome::Failed {
                        file: file.clone(),
                        attempts: attempt + 1,
                        error: last_error,
                    };
                }
                if attempt + 1 < total {
                    let delay = backoff.delay_with_hint(attempt, hint);
                    warn!(
                        remote_id = %file.remote_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "retrying download"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    FetchOutcome::Failed {
        file: file.clone(),
        attempts: total,
        error: last_error,
    }
}
