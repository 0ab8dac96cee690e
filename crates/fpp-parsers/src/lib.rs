//! The closed set of report parsers: two XML dialects and two Excel
//! layouts. Parsing is pure (bytes in, records out); all I/O stays with
//! the callers.

pub mod excel;
pub mod xml;

use std::collections::HashMap;
use std::io::Read;

use thiserror::Error;
use tracing::debug;

use fpp_core::{FundSnapshot, PositionRecord};

pub const CRATE_NAME: &str = "fpp-parsers";

/// Payload handed to the parsers: raw bytes plus the minimal identity
/// needed to stamp records.
#[derive(Debug, Clone)]
pub struct RawReport {
    pub file_name: String,
    pub fund_local_id: i64,
    pub bytes: Vec<u8>,
}

/// Everything one report yields: the position slice and the fund-level
/// snapshot for its reference date.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    pub reference_date: chrono::NaiveDate,
    pub snapshot: Option<FundSnapshot>,
    pub records: Vec<PositionRecord>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{file}: no parser recognizes this payload")]
    Unrecognized { file: String },
    #[error("{file}: required section missing: {section}")]
    MissingSection { file: String, section: String },
    #[error("{file}: unparseable date: {value:?}")]
    BadDate { file: String, value: String },
    #[error("{file}: non-numeric value in {field}: {value:?}")]
    BadNumber {
        file: String,
        field: String,
        value: String,
    },
    #[error("{file}: malformed xml: {detail}")]
    Xml { file: String, detail: String },
    #[error("{file}: unreadable spreadsheet: {detail}")]
    Spreadsheet { file: String, detail: String },
    #[error("{file}: broken zip archive: {detail}")]
    Archive { file: String, detail: String },
    #[error("{file}: zip archive holds no report payload")]
    EmptyArchive { file: String },
}

/// The parser variants, in dispatch priority order. The set is closed on
/// purpose: a new report dialect is a new variant, not a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportParser {
    CurrentXml,
    LegacyXml,
    CurrentExcel,
    LegacyExcel,
}

impl ReportParser {
    pub const PRIORITY: [ReportParser; 4] = [
        ReportParser::CurrentXml,
        ReportParser::LegacyXml,
        ReportParser::CurrentExcel,
        ReportParser::LegacyExcel,
    ];

    /// Cheap structural sniff: root element for XML, workbook magic plus
    /// filename convention for the spreadsheets. Never touches I/O.
    pub fn can_parse(&self, report: &RawReport) -> bool {
        match self {
            ReportParser::CurrentXml => {
                xml::root_element(&report.bytes)
                    .is_some_and(|root| root.eq_ignore_ascii_case("Document"))
            }
            ReportParser::LegacyXml => xml::root_element(&report.bytes)
                .is_some_and(|root| root.to_ascii_lowercase().starts_with("arquivoposicao")),
            ReportParser::CurrentExcel => {
                excel::looks_like_workbook(&report.bytes)
                    && report.file_name.to_uppercase().contains("CARTEIRA_DIARIA")
            }
            ReportParser::LegacyExcel => {
                let name = report.file_name.to_lowercase();
                excel::looks_like_workbook(&report.bytes)
                    && !report.file_name.to_uppercase().contains("CARTEIRA_DIARIA")
                    && (name.contains("carteira excel")
                        || name.contains("posição")
                        || name.contains("posicao"))
            }
        }
    }

    pub fn parse(&self, report: &RawReport) -> Result<ParsedReport, ParseError> {
        match self {
            ReportParser::CurrentXml => xml::parse_current(report),
            ReportParser::LegacyXml => xml::parse_legacy(report),
            ReportParser::CurrentExcel => excel::parse_current(report),
            ReportParser::LegacyExcel => excel::parse_legacy(report),
        }
    }
}

/// Unwraps zip wrapping (if any), then dispatches to the first variant
/// whose `can_parse` accepts the payload.
pub fn parse_report(report: &RawReport) -> Result<ParsedReport, ParseError> {
    let unwrapped = unwrap_archive(report)?;
    for parser in ReportParser::PRIORITY {
        if parser.can_parse(&unwrapped) {
            debug!(file = %unwrapped.file_name, ?parser, "parser selected");
            return parser.parse(&unwrapped);
        }
    }
    Err(ParseError::Unrecognized {
        file: report.file_name.clone(),
    })
}

/// Portal downloads occasionally arrive zip-wrapped. Workbooks are zip
/// containers themselves, so those pass through untouched.
fn unwrap_archive(report: &RawReport) -> Result<RawReport, ParseError> {
    if !report.bytes.starts_with(b"PK\x03\x04") || excel::looks_like_workbook(&report.bytes) {
        return Ok(report.clone());
    }
    let cursor = std::io::Cursor::new(report.bytes.as_slice());
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|err| ParseError::Archive {
            file: report.file_name.clone(),
            detail: err.to_string(),
        })?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|err| ParseError::Archive {
            file: report.file_name.clone(),
            detail: err.to_string(),
        })?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|err| ParseError::Archive {
                file: report.file_name.clone(),
                detail: err.to_string(),
            })?;
        return Ok(RawReport {
            file_name: name,
            fund_local_id: report.fund_local_id,
            bytes,
        });
    }
    Err(ParseError::EmptyArchive {
        file: report.file_name.clone(),
    })
}

/// Builds a stable instrument key from a display name, disambiguating
/// repeated names within one report so the `(fund, date, category, key)`
/// tuple stays unique.
pub(crate) fn instrument_key(base: &str, used: &mut HashMap<String, u32>) -> String {
    let mut slug: String = base
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    while slug.contains("__") {
        slug = slug.replace("__", "_");
    }
    let slug = slug.trim_matches('_').to_string();
    let slug = if slug.is_empty() { "item".to_string() } else { slug };
    let count = used.entry(slug.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        slug
    } else {
        format!("{slug}#{count}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn instrument_keys_disambiguate_repeats() {
        let mut used = HashMap::new();
        assert_eq!(instrument_key("Conta Corrente", &mut used), "conta_corrente");
        assert_eq!(instrument_key("Conta Corrente", &mut used), "conta_corrente#2");
        assert_eq!(instrument_key("  ", &mut used), "item");
    }

    #[test]
    fn zip_wrapped_xml_is_unwrapped_before_dispatch() {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file::<_, ()>("carteira.xml", Default::default())
                .unwrap();
            writer.write_all(b"<?xml version=\"1.0\"?><Document/>").unwrap();
            writer.finish().unwrap();
        }
        let report = RawReport {
            file_name: "carteira.zip".into(),
            fund_local_id: 1,
            bytes: buffer.into_inner(),
        };
        let unwrapped = unwrap_archive(&report).unwrap();
        assert_eq!(unwrapped.file_name, "carteira.xml");
        assert!(ReportParser::CurrentXml.can_parse(&unwrapped));
    }

    #[test]
    fn unknown_payload_is_unrecognized() {
        let report = RawReport {
            file_name: "mistério.bin".into(),
            fund_local_id: 1,
            bytes: vec![0u8; 16],
        };
        assert!(matches!(
            parse_report(&report),
            Err(ParseError::Unrecognized { .. })
        ));
    }
}
