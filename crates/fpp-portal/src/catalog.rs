//! Paginated portal file listing with cross-page dedup.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use fpp_core::{locale, DateRange, FundIdentity, ReportFile, ReportKind};

use crate::auth::{AuthError, AuthSession};
use crate::ApiErrorBody;

/// Pagination stops unconditionally past this page index. The portal has
/// been seen reporting `last: false` together with an exhausted listing.
const MAX_PAGES: u32 = 500;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("listing page {page} is malformed: {reason}")]
    MalformedPage { page: u32, reason: String },
    #[error("listing request failed with status {status}: {detail}")]
    Http { status: u16, detail: String },
    #[error("listing transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Deserialize)]
struct ListingPage {
    #[serde(default)]
    content: Vec<ListingEntry>,
    #[serde(rename = "totalPages", default)]
    total_pages: Option<u32>,
    #[serde(default)]
    last: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    #[serde(alias = "guid")]
    id: Option<String>,
    #[serde(alias = "nomeArquivo", alias = "nome")]
    name: Option<String>,
    #[serde(alias = "dataReferencia", alias = "data")]
    reference_date: Option<String>,
    #[serde(alias = "tamanho")]
    size: Option<u64>,
}

pub struct FileCatalog {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<AuthSession>,
}

impl FileCatalog {
    pub fn new(client: reqwest::Client, base_url: &str, auth: Arc<AuthSession>) -> FileCatalog {
        FileCatalog {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// Lists every file of `kind` for `fund` whose reference date falls in
    /// `range`. Walks zero-based pages until the portal's `last` flag,
    /// deduplicating by remote file id across pages.
    pub async fn list_files(
        &self,
        fund: &FundIdentity,
        kind: ReportKind,
        range: DateRange,
    ) -> Result<Vec<ReportFile>, CatalogError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        let mut page = 0u32;
        loop {
            let listing = self.fetch_page(fund, kind, page).await?;
            let total_pages = listing.total_pages.unwrap_or(1);
            let last = listing.last.unwrap_or(page + 1 >= total_pages);
            collect_entries(&mut files, &mut seen, listing, fund, kind, range, page)?;
            page += 1;
            if last || page >= total_pages || page >= MAX_PAGES {
                if !last && page >= MAX_PAGES {
                    warn!(fund = %fund.display_name, ?kind, "page cap reached before last flag");
                }
                break;
            }
        }
        debug!(fund = %fund.display_name, ?kind, files = files.len(), "listing complete");
        Ok(files)
    }

    async fn fetch_page(
        &self,
        fund: &FundIdentity,
        kind: ReportKind,
        page: u32,
    ) -> Result<ListingPage, CatalogError> {
        let token = self.auth.ensure_valid().await?;
        let url = format!(
            "{}/api/v1/fundos-posicao/{}/arquivos",
            self.base_url, fund.remote_id
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("tipo", kind.portal_param()), ("p", &page.to_string())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let detail = ApiErrorBody::summarize(&body)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(CatalogError::Http {
                status: status.as_u16(),
                detail,
            });
        }
        response
            .json::<ListingPage>()
            .await
            .map_err(|err| CatalogError::MalformedPage {
                page,
                reason: err.to_string(),
            })
    }
}

/// Folds one decoded page into the accumulated file list, skipping ids seen
/// on earlier pages and entries outside the date window.
fn collect_entries(
    files: &mut Vec<ReportFile>,
    seen: &mut HashSet<String>,
    listing: ListingPage,
    fund: &FundIdentity,
    kind: ReportKind,
    range: DateRange,
    page: u32,
) -> Result<(), CatalogError> {
    for entry in listing.content {
        let remote_id = entry.id.ok_or_else(|| CatalogError::MalformedPage {
            page,
            reason: "entry without file id".into(),
        })?;
        if !seen.insert(remote_id.clone()) {
            continue;
        }
        let reference_date = match entry.reference_date.as_deref().map(locale::parse_date) {
            Some(Ok(date)) => date,
            _ => {
                warn!(%remote_id, "entry without usable reference date, skipped");
                continue;
            }
        };
        if !range.contains(reference_date) {
            continue;
        }
        files.push(ReportFile {
            remote_id,
            fund_remote_id: fund.remote_id.clone(),
            fund_local_id: fund.local_id,
            kind,
            reference_date,
            file_name: entry.name.unwrap_or_default(),
            byte_size: entry.size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fund() -> FundIdentity {
        FundIdentity {
            remote_id: "f-1".into(),
            local_id: 1,
            display_name: "FIP Teste".into(),
            tax_id: "00.000.000/0001-00".into(),
            kind: fpp_core::FundKind::Fip,
        }
    }

    fn range() -> DateRange {
        DateRange {
            start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        }
    }

    fn page(json: &str) -> ListingPage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn listing_page_decodes_portal_field_names() {
        let listing = page(
            r#"{"content":[{"guid":"a1","nomeArquivo":"01.03 - Carteira XML - FIP.xml","dataReferencia":"2025-03-01","tamanho":1024}],"totalPages":2,"last":false}"#,
        );
        assert_eq!(listing.content.len(), 1);
        assert_eq!(listing.total_pages, Some(2));
        assert_eq!(listing.last, Some(false));
        assert_eq!(listing.content[0].id.as_deref(), Some("a1"));
    }

    #[test]
    fn duplicate_ids_across_pages_collapse_to_one_item() {
        let fund = fund();
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        let first = page(
            r#"{"content":[{"id":"a1","nome":"x.xml","data":"2025-03-01"},{"id":"a2","nome":"y.xml","data":"2025-03-01"}],"totalPages":2,"last":false}"#,
        );
        let second = page(
            r#"{"content":[{"id":"a2","nome":"y.xml","data":"2025-03-01"},{"id":"a3","nome":"z.xml","data":"2025-03-02"}],"totalPages":2,"last":true}"#,
        );
        collect_entries(&mut files, &mut seen, first, &fund, ReportKind::XmlCurrent, range(), 0)
            .unwrap();
        collect_entries(&mut files, &mut seen, second, &fund, ReportKind::XmlCurrent, range(), 1)
            .unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.remote_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn entries_outside_window_are_dropped() {
        let fund = fund();
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        let listing = page(
            r#"{"content":[{"id":"old","nome":"o.xml","data":"2024-06-01"},{"id":"new","nome":"n.xml","data":"2025-06-01"}],"last":true}"#,
        );
        collect_entries(&mut files, &mut seen, listing, &fund, ReportKind::XmlCurrent, range(), 0)
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].remote_id, "new");
    }

    #[test]
    fn entry_without_id_is_a_malformed_page() {
        let fund = fund();
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        let listing = page(r#"{"content":[{"nome":"x.xml","data":"2025-03-01"}],"last":true}"#);
        let err = collect_entries(
            &mut files,
            &mut seen,
            listing,
            &fund,
            ReportKind::XmlCurrent,
            range(),
            3,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::MalformedPage { page: 3, .. }));
    }
}
