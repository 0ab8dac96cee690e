//! On-disk archive for downloaded report payloads.
//!
//! Files land under `<root>/<kind>/<YYYY>/<MM>/` with the operations team's
//! naming convention (`DD.MM - <label> - <fund>`). Writes go through a
//! temp file and an atomic rename; a same-name file with identical content
//! is deduplicated, different content gets a ` (n)` version suffix.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Datelike;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use fpp_core::ReportFile;

const MAX_VERSIONS: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReport {
    pub path: PathBuf,
    pub sha256: String,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct ReportArchive {
    root: PathBuf,
}

impl ReportArchive {
    pub fn new(root: impl Into<PathBuf>) -> ReportArchive {
        ReportArchive { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(kind: fpp_core::ReportKind) -> &'static str {
        match kind {
            fpp_core::ReportKind::Pdf => "pdf",
            fpp_core::ReportKind::Excel => "excel",
            fpp_core::ReportKind::XmlLegacy => "xml_legacy",
            fpp_core::ReportKind::XmlCurrent => "xml",
        }
    }

    fn base_name(file: &ReportFile, fund_display_name: &str) -> String {
        format!(
            "{:02}.{:02} - {} - {}",
            file.reference_date.day(),
            file.reference_date.month(),
            file.kind.label(),
            fund_display_name
        )
    }

    /// Stores one payload, returning its final path. Idempotent per
    /// content: re-storing identical bytes lands on the existing file.
    pub async fn store(
        &self,
        file: &ReportFile,
        fund_display_name: &str,
        bytes: &[u8],
    ) -> Result<StoredReport> {
        let sha256 = sha256_hex(bytes);
        let dir = self
            .root
            .join(Self::kind_dir(file.kind))
            .join(format!("{:04}", file.reference_date.year()))
            .join(format!("{:02}", file.reference_date.month()));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating archive dir {}", dir.display()))?;

        let base = Self::base_name(file, fund_display_name);
        let extension = file.kind.extension();
        for version in 0..MAX_VERSIONS {
            let name = if version == 0 {
                format!("{base}{extension}")
            } else {
                format!("{base} ({version}){extension}")
            };
            let target = dir.join(&name);
            match tokio::fs::read(&target).await {
                Ok(existing) => {
                    if sha256_hex(&existing) == sha256 {
                        debug!(path = %target.display(), "archive hit, content unchanged");
                        return Ok(StoredReport {
                            path: target,
                            sha256,
                            deduplicated: true,
                        });
                    }
                    // Same name, different content: try the next version.
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    write_atomic(&target, bytes).await?;
                    return Ok(StoredReport {
                        path: target,
                        sha256,
                        deduplicated: false,
                    });
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("probing {}", target.display()));
                }
            }
        }
        anyhow::bail!("version cap reached archiving {base}{extension}");
    }
}

async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .context("archive target has no parent directory")?;
    let temp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    tokio::fs::write(&temp, bytes)
        .await
        .with_context(|| format!("writing {}", temp.display()))?;
    tokio::fs::rename(&temp, target)
        .await
        .with_context(|| format!("renaming into {}", target.display()))?;
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fpp_core::ReportKind;

    fn mk_file() -> ReportFile {
        ReportFile {
            remote_id: "a1".into(),
            fund_remote_id: "f-1".into(),
            fund_local_id: 1,
            kind: ReportKind::XmlCurrent,
            reference_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            file_name: "portal.xml".into(),
            byte_size: None,
        }
    }

    #[test]
    fn hashing_is_stable() {
        assert_eq!(sha256_hex(b"abc"), sha256_hex(b"abc"));
        assert_ne!(sha256_hex(b"abc"), sha256_hex(b"abd"));
    }

    #[tokio::test]
    async fn identical_content_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ReportArchive::new(dir.path());
        let file = mk_file();
        let first = archive.store(&file, "FIP Teste", b"<Document/>").await.unwrap();
        let second = archive.store(&file, "FIP Teste", b"<Document/>").await.unwrap();
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.path, second.path);
        assert!(first
            .path
            .to_string_lossy()
            .contains("14.03 - Carteira XML - FIP Teste"));
    }

    #[tokio::test]
    async fn different_content_gets_version_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ReportArchive::new(dir.path());
        let file = mk_file();
        let first = archive.store(&file, "FIP Teste", b"<Document>1</Document>").await.unwrap();
        let second = archive.store(&file, "FIP Teste", b"<Document>2</Document>").await.unwrap();
        assert_ne!(first.path, second.path);
        assert!(second.path.to_string_lossy().contains("(1)"));
    }

    #[tokio::test]
    async fn layout_is_kind_year_month() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ReportArchive::new(dir.path());
        let stored = archive.store(&mk_file(), "FIP Teste", b"x").await.unwrap();
        let relative = stored.path.strip_prefix(dir.path()).unwrap();
        let parts: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
        assert_eq!(parts[0], "xml");
        assert_eq!(parts[1], "2025");
        assert_eq!(parts[2], "03");
    }
}
