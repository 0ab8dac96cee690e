//! Core domain model shared across the fund position pipeline.

pub mod calendar;
pub mod locale;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "fpp-core";

/// Long-lived identity of one fund, joined across portal, primary store and
/// warehouse. `remote_id` is the portal's immutable GUID; `local_id` is
/// assigned by the primary store on first sight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundIdentity {
    pub remote_id: String,
    pub local_id: i64,
    pub display_name: String,
    pub tax_id: String,
    pub kind: FundKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FundKind {
    Fip,
    Fidc,
    Fim,
    Fia,
}

impl FundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundKind::Fip => "FIP",
            FundKind::Fidc => "FIDC",
            FundKind::Fim => "FIM",
            FundKind::Fia => "FIA",
        }
    }

    pub fn parse(value: &str) -> Option<FundKind> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FIP" => Some(FundKind::Fip),
            "FIDC" => Some(FundKind::Fidc),
            "FIM" => Some(FundKind::Fim),
            "FIA" => Some(FundKind::Fia),
            _ => None,
        }
    }
}

/// Report formats the portal exposes per fund. The portal names each format
/// with its own query parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportKind {
    Pdf,
    Excel,
    XmlLegacy,
    XmlCurrent,
}

impl ReportKind {
    pub const ALL: [ReportKind; 4] = [
        ReportKind::Pdf,
        ReportKind::Excel,
        ReportKind::XmlLegacy,
        ReportKind::XmlCurrent,
    ];

    /// Value of the `tipo` query parameter on the portal file listing.
    pub fn portal_param(&self) -> &'static str {
        match self {
            ReportKind::Pdf => "CARTEIRA_PDF",
            ReportKind::Excel => "CARTEIRA_EXCEL",
            ReportKind::XmlLegacy => "XML_4_01",
            ReportKind::XmlCurrent => "XML_5_0",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportKind::Pdf => ".pdf",
            ReportKind::Excel => ".xlsx",
            ReportKind::XmlLegacy | ReportKind::XmlCurrent => ".xml",
        }
    }

    /// Human label used in archive file names.
    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::Pdf => "Carteira PDF",
            ReportKind::Excel => "Carteira Excel",
            ReportKind::XmlLegacy => "Carteira XML 4.01",
            ReportKind::XmlCurrent => "Carteira XML",
        }
    }
}

/// One file entry from the portal listing. Lives only for the duration of a
/// run; `remote_id` is the dedup and download key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFile {
    pub remote_id: String,
    pub fund_remote_id: String,
    pub fund_local_id: i64,
    pub kind: ReportKind,
    pub reference_date: NaiveDate,
    pub file_name: String,
    pub byte_size: Option<u64>,
}

/// Closed set of position categories every parser normalizes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionCategory {
    Cash,
    FixedIncome,
    Equity,
    Receivable,
    Accrual,
}

impl PositionCategory {
    pub const ALL: [PositionCategory; 5] = [
        PositionCategory::Cash,
        PositionCategory::FixedIncome,
        PositionCategory::Equity,
        PositionCategory::Receivable,
        PositionCategory::Accrual,
    ];

    /// Stable name used for table suffixes and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionCategory::Cash => "cash",
            PositionCategory::FixedIncome => "fixed_income",
            PositionCategory::Equity => "equity",
            PositionCategory::Receivable => "receivable",
            PositionCategory::Accrual => "accrual",
        }
    }
}

/// One normalized position line. At most one record exists per
/// `(fund_local_id, reference_date, category, instrument_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub fund_local_id: i64,
    pub reference_date: NaiveDate,
    pub instrument_key: String,
    pub attributes: PositionAttributes,
}

/// Category-specific payload of a position record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum PositionAttributes {
    Cash {
        description: String,
        institution: Option<String>,
        currency: String,
        balance: f64,
    },
    FixedIncome {
        description: String,
        issuer: Option<String>,
        quantity: f64,
        unit_price: f64,
        market_value: f64,
        /// Kept as delivered ("6,50", "CDI + 2,00"); typed during migration.
        rate: Option<String>,
        maturity: Option<NaiveDate>,
    },
    Equity {
        ticker: String,
        description: String,
        quantity: f64,
        unit_price: f64,
        market_value: f64,
    },
    Receivable {
        description: String,
        due_date: Option<NaiveDate>,
        amount: f64,
    },
    /// Payables and provisions; `amount` is negative by convention.
    Accrual {
        description: String,
        due_date: Option<NaiveDate>,
        amount: f64,
    },
}

impl PositionAttributes {
    pub fn category(&self) -> PositionCategory {
        match self {
            PositionAttributes::Cash { .. } => PositionCategory::Cash,
            PositionAttributes::FixedIncome { .. } => PositionCategory::FixedIncome,
            PositionAttributes::Equity { .. } => PositionCategory::Equity,
            PositionAttributes::Receivable { .. } => PositionCategory::Receivable,
            PositionAttributes::Accrual { .. } => PositionCategory::Accrual,
        }
    }

    /// Signed monetary value of the line.
    pub fn value(&self) -> f64 {
        match self {
            PositionAttributes::Cash { balance, .. } => *balance,
            PositionAttributes::FixedIncome { market_value, .. } => *market_value,
            PositionAttributes::Equity { market_value, .. } => *market_value,
            PositionAttributes::Receivable { amount, .. } => *amount,
            PositionAttributes::Accrual { amount, .. } => *amount,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            PositionAttributes::Cash { description, .. }
            | PositionAttributes::FixedIncome { description, .. }
            | PositionAttributes::Equity { description, .. }
            | PositionAttributes::Receivable { description, .. }
            | PositionAttributes::Accrual { description, .. } => description,
        }
    }
}

/// Per fund-date net asset value and quota figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundSnapshot {
    pub fund_local_id: i64,
    pub reference_date: NaiveDate,
    pub net_asset_value: f64,
    pub quota_value: Option<f64>,
    pub quota_quantity: Option<f64>,
}

/// Inclusive date window a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn single(day: NaiveDate) -> DateRange {
        DateRange { start: day, end: day }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }

    /// Calendar years the window touches, ascending.
    pub fn years(&self) -> impl Iterator<Item = i32> {
        use chrono::Datelike;
        self.start.year()..=self.end.year()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_kind_maps_to_portal_params() {
        assert_eq!(ReportKind::XmlCurrent.portal_param(), "XML_5_0");
        assert_eq!(ReportKind::XmlLegacy.portal_param(), "XML_4_01");
        assert_eq!(ReportKind::Excel.portal_param(), "CARTEIRA_EXCEL");
        assert_eq!(ReportKind::Pdf.portal_param(), "CARTEIRA_PDF");
    }

    #[test]
    fn date_range_membership_and_years() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2024, 12, 30).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
        };
        assert!(range.contains(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2025, 1, 4).unwrap()));
        assert_eq!(range.years().collect::<Vec<_>>(), vec![2024, 2025]);
    }

    #[test]
    fn accrual_value_keeps_sign() {
        let attrs = PositionAttributes::Accrual {
            description: "taxa de administração".into(),
            due_date: None,
            amount: -1500.0,
        };
        assert_eq!(attrs.category(), PositionCategory::Accrual);
        assert_eq!(attrs.value(), -1500.0);
    }
}
