//! Portal access: authenticated session, paginated file catalog, bounded
//! concurrent downloads with retry, and the on-disk report archive.

pub mod archive;
pub mod auth;
pub mod catalog;
pub mod fetch;

use serde::Deserialize;

pub const CRATE_NAME: &str = "fpp-portal";

pub use archive::{ReportArchive, StoredReport};
pub use auth::{AuthError, AuthSession, Credentials};
pub use catalog::{CatalogError, FileCatalog};
pub use fetch::{
    BackoffPolicy, FetchError, FetchOrchestrator, FetchOutcome, FetchReport, FetchedFile,
    PortalFetcher, ReportFetcher,
};

/// Structured error body the portal attaches to non-success responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub timestamp: Option<String>,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub path: Option<String>,
}

impl ApiErrorBody {
    /// Best human-readable line from the envelope, if the body decodes.
    pub fn summarize(body: &[u8]) -> Option<String> {
        let parsed: ApiErrorBody = serde_json::from_slice(body).ok()?;
        let mut parts = Vec::new();
        if let Some(error) = &parsed.error {
            parts.push(error.clone());
        }
        if let Some(message) = &parsed.message {
            parts.push(message.clone());
        }
        if let Some(path) = &parsed.path {
            parts.push(format!("at {path}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(": "))
        }
    }
}
