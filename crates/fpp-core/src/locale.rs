//! Coercion of locale-formatted text delivered by the portal and by legacy
//! report payloads: Brazilian decimal notation, mixed date formats, and
//! 8-bit encoded text.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoercionError {
    #[error("non-numeric value: {0:?}")]
    Decimal(String),
    #[error("unparseable date: {0:?}")]
    Date(String),
}

/// Parses `"1.234,56"` as well as plain `"1234.56"` and `"1234"`.
///
/// A value with both separators is taken as Brazilian notation (dot for
/// thousands, comma for decimals). A value with only a comma treats the
/// comma as the decimal mark.
pub fn parse_decimal(raw: &str) -> Result<f64, CoercionError> {
    let trimmed = raw.trim().trim_start_matches("R$").trim();
    if trimmed.is_empty() {
        return Err(CoercionError::Decimal(raw.to_string()));
    }
    let normalized = if trimmed.contains(',') {
        trimmed.replace('.', "").replace(',', ".")
    } else {
        trimmed.to_string()
    };
    normalized
        .parse::<f64>()
        .map_err(|_| CoercionError::Decimal(raw.to_string()))
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%Y%m%d", "%d-%m-%Y"];

/// Parses the date formats seen across the portal listing, both XML dialects
/// and the primary store's text columns.
pub fn parse_date(raw: &str) -> Result<NaiveDate, CoercionError> {
    let trimmed = raw.trim();
    // Listing entries sometimes carry a trailing time component.
    let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            return Ok(date);
        }
    }
    Err(CoercionError::Date(raw.to_string()))
}

/// Decodes bytes that may be UTF-8 or a legacy 8-bit encoding into unicode.
/// Legacy report payloads and migrated text columns are windows-1252.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

/// Decodes an XML payload, honoring an 8-bit charset named in the
/// declaration even when the bytes would also be valid UTF-8.
pub fn decode_xml(bytes: &[u8]) -> String {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(128)]).to_lowercase();
    if head.contains("iso-8859-1") || head.contains("windows-1252") {
        let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
        text.into_owned()
    } else {
        decode_text(bytes)
    }
}
