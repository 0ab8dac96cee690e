//! Excel report layouts.
//!
//! The workbook is flattened into a plain cell grid first; all layout
//! interpretation happens on the grid, keeping the section-scan logic pure.
//!
//! Legacy layout: free-form sheet navigated by section markers in the
//! label column, each section closed by its total row. Current layout
//! ("CARTEIRA_DIARIA"): one named-column table with section labels in the
//! first column.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use chrono::NaiveDate;

use fpp_core::{locale, FundSnapshot, PositionAttributes, PositionCategory, PositionRecord};

use crate::{instrument_key, ParseError, ParsedReport, RawReport};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(&self) -> Option<&str> {
        match self {
            Cell::Text(t) if !t.trim().is_empty() => Some(t.trim()),
            _ => None,
        }
    }

    /// Numeric content, accepting locale-formatted text cells.
    fn number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(t) => locale::parse_decimal(t).ok(),
            Cell::Empty => None,
        }
    }
}

/// Workbook magic: a zip container holding the office content-types entry.
pub(crate) fn looks_like_workbook(bytes: &[u8]) -> bool {
    if !bytes.starts_with(b"PK\x03\x04") {
        return false;
    }
    let cursor = Cursor::new(bytes);
    match zip::ZipArchive::new(cursor) {
        Ok(mut archive) => archive.by_name("[Content_Types].xml").is_ok(),
        Err(_) => false,
    }
}

fn grid_from_workbook(report: &RawReport) -> Result<Vec<Vec<Cell>>, ParseError> {
    let spreadsheet_err = |detail: String| ParseError::Spreadsheet {
        file: report.file_name.clone(),
        detail,
    };
    let cursor = Cursor::new(report.bytes.clone());
    let mut workbook: Xlsx<_> = Xlsx::new(cursor).map_err(|e| spreadsheet_err(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| spreadsheet_err("workbook has no sheets".into()))?
        .map_err(|e| spreadsheet_err(e.to_string()))?;
    let grid = range
        .rows()
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect();
    Ok(grid)
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Number(if *b { 1.0 } else { 0.0 }),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(stamp) => Cell::Text(stamp.date().format("%Y-%m-%d").to_string()),
            None => Cell::Empty,
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

pub(crate) fn parse_legacy(report: &RawReport) -> Result<ParsedReport, ParseError> {
    let grid = grid_from_workbook(report)?;
    scan_legacy(report, &grid)
}

pub(crate) fn parse_current(report: &RawReport) -> Result<ParsedReport, ParseError> {
    let grid = grid_from_workbook(report)?;
    scan_current(report, &grid)
}

/// First parseable date in the top rows; both layouts place the position
/// date near the sheet header, sometimes behind a `Posição em:` label.
fn sheet_date(grid: &[Vec<Cell>]) -> Option<NaiveDate> {
    for row in grid.iter().take(12) {
        for cell in row {
            if let Some(text) = cell.text() {
                let candidate = text
                    .rsplit_once(':')
                    .map(|(_, tail)| tail.trim())
                    .unwrap_or(text);
                if let Ok(date) = locale::parse_date(candidate) {
                    return Some(date);
                }
            }
        }
    }
    None
}

fn require_date(report: &RawReport, grid: &[Vec<Cell>]) -> Result<NaiveDate, ParseError> {
    sheet_date(grid).ok_or_else(|| ParseError::MissingSection {
        file: report.file_name.clone(),
        section: "data da posição".into(),
    })
}

fn row_label(row: &[Cell]) -> Option<String> {
    // Label column is usually the second, with older sheets using the first.
    row.get(1)
        .and_then(Cell::text)
        .or_else(|| row.first().and_then(Cell::text))
        .map(|t| t.trim().to_lowercase())
}

fn row_numbers(row: &[Cell]) -> Vec<f64> {
    row.iter().filter_map(Cell::number).collect()
}

/// Accent folding so marker comparison survives the sheets' mixed spelling.
fn normalize(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ã' | 'â' => 'a',
            'é' | 'ê' => 'e',
            'í' => 'i',
            'ó' | 'õ' | 'ô' => 'o',
            'ú' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

const LEGACY_SECTIONS: [(&str, &str, PositionCategory); 5] = [
    ("acoes", "total acoes", PositionCategory::Equity),
    ("renda fixa", "total renda fixa", PositionCategory::FixedIncome),
    ("saldos em conta corrente", "patrimonio", PositionCategory::Cash),
    ("valores a receber", "total a receber", PositionCategory::Receivable),
    ("valores a pagar", "total a pagar", PositionCategory::Accrual),
];

fn scan_legacy(report: &RawReport, grid: &[Vec<Cell>]) -> Result<ParsedReport, ParseError> {
    let reference_date = require_date(report, grid)?;
    let mut records = Vec::new();
    let mut used = HashMap::new();
    let mut net_asset_value = None;
    let mut section: Option<(PositionCategory, &'static str)> = None;

    for row in grid {
        let label = match row_label(row) {
            Some(label) => normalize(&label),
            None => continue,
        };

        if label.starts_with("patrimonio fechamento") || label.starts_with("patrimonio liquido") {
            net_asset_value = row_numbers(row).last().copied().or(net_asset_value);
            section = None;
            continue;
        }
        if let Some((_, end_marker)) = section {
            if label.starts_with(end_marker) {
                section = None;
                continue;
            }
        }
        if let Some(&(_, end, category)) = LEGACY_SECTIONS
            .iter()
            .find(|(start, _, _)| label == *start || label == format!("{start}:"))
        {
            section = Some((category, end));
            continue;
        }

        let (category, _) = match section {
            Some(active) => active,
            None => continue,
        };
        let numbers = row_numbers(row);
        let value = match numbers.last() {
            Some(value) => *value,
            // Column-header rows inside a section carry no numerics.
            None => continue,
        };
        let description = row
            .iter()
            .filter_map(Cell::text)
            .next()
            .unwrap_or("sem descrição")
            .to_string();
        let (quantity, unit_price) = if numbers.len() >= 3 {
            (numbers[0], numbers[1])
        } else {
            (0.0, 0.0)
        };
        records.push(build_record(
            report,
            category,
            &description,
            quantity,
            unit_price,
            value,
            reference_date,
            &mut used,
        ));
    }

    finish(report, reference_date, net_asset_value, records)
}

/// Column semantics of the current layout's single table.
#[derive(Debug, Default)]
struct ColumnMap {
    description: usize,
    quantity: Option<usize>,
    unit_price: Option<usize>,
    value: Option<usize>,
}

fn detect_columns(row: &[Cell]) -> Option<ColumnMap> {
    let mut map = ColumnMap::default();
    let mut saw_description = false;
    for (index, cell) in row.iter().enumerate() {
        let Some(text) = cell.text() else { continue };
        let header = normalize(&text.to_lowercase());
        if header.contains("descricao") || header.contains("ativo") {
            map.description = index;
            saw_description = true;
        } else if header.contains("quantidade") {
            map.quantity = Some(index);
        } else if header.contains("preco") {
            map.unit_price = Some(index);
        } else if header.contains("valor") {
            map.value = Some(index);
        }
    }
    (saw_description && map.value.is_some()).then_some(map)
}

const CURRENT_SECTIONS: [(&str, PositionCategory); 5] = [
    ("caixa", PositionCategory::Cash),
    ("renda fixa", PositionCategory::FixedIncome),
    ("renda variavel", PositionCategory::Equity),
    ("valores a receber", PositionCategory::Receivable),
    ("valores a pagar", PositionCategory::Accrual),
];

fn scan_current(report: &RawReport, grid: &[Vec<Cell>]) -> Result<ParsedReport, ParseError> {
    let reference_date = require_date(report, grid)?;
    let mut columns: Option<ColumnMap> = None;
    let mut section: Option<PositionCategory> = None;
    let mut net_asset_value = None;
    let mut records = Vec::new();
    let mut used = HashMap::new();

    for row in grid {
        if columns.is_none() {
            columns = detect_columns(row);
            if columns.is_some() {
                continue;
            }
        }
        let first = row
            .first()
            .and_then(Cell::text)
            .map(|t| normalize(&t.to_lowercase()));
        if let Some(first) = &first {
            if first.starts_with("patrimonio") {
                net_asset_value = row_numbers(row).last().copied().or(net_asset_value);
                section = None;
                continue;
            }
            if let Some(&(_, category)) = CURRENT_SECTIONS
                .iter()
                .find(|(marker, _)| first == marker || first.starts_with(&format!("{marker} ")))
            {
                section = Some(category);
                continue;
            }
            if first.starts_with("total") {
                section = None;
                continue;
            }
        }

        let (Some(columns), Some(category)) = (&columns, section) else {
            continue;
        };
        let description = match row.get(columns.description).and_then(Cell::text) {
            Some(text) => text.to_string(),
            None => continue,
        };
        let value = match columns.value.and_then(|i| row.get(i)).and_then(Cell::number) {
            Some(value) => value,
            None => continue,
        };
        let quantity = columns
            .quantity
            .and_then(|i| row.get(i))
            .and_then(Cell::number)
            .unwrap_or(0.0);
        let unit_price = columns
            .unit_price
            .and_then(|i| row.get(i))
            .and_then(Cell::number)
            .unwrap_or(0.0);
        records.push(build_record(
            report,
            category,
            &description,
            quantity,
            unit_price,
            value,
            reference_date,
            &mut used,
        ));
    }

    finish(report, reference_date, net_asset_value, records)
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    report: &RawReport,
    category: PositionCategory,
    description: &str,
    quantity: f64,
    unit_price: f64,
    value: f64,
    reference_date: NaiveDate,
    used: &mut HashMap<String, u32>,
) -> PositionRecord {
    let attributes = match category {
        PositionCategory::Cash => PositionAttributes::Cash {
            description: description.to_string(),
            institution: None,
            currency: "BRL".into(),
            balance: value,
        },
        PositionCategory::Equity => PositionAttributes::Equity {
            ticker: description.to_string(),
            description: description.to_string(),
            quantity,
            unit_price,
            market_value: value,
        },
        PositionCategory::FixedIncome => PositionAttributes::FixedIncome {
            description: description.to_string(),
            issuer: None,
            quantity,
            unit_price,
            market_value: value,
            rate: None,
            maturity: None,
        },
        PositionCategory::Receivable => PositionAttributes::Receivable {
            description: description.to_string(),
            due_date: None,
            amount: value.abs(),
        },
        PositionCategory::Accrual => PositionAttributes::Accrual {
            description: description.to_string(),
            due_date: None,
            amount: -value.abs(),
        },
    };
    PositionRecord {
        fund_local_id: report.fund_local_id,
        reference_date,
        instrument_key: instrument_key(description, used),
        attributes,
    }
}

fn finish(
    report: &RawReport,
    reference_date: NaiveDate,
    net_asset_value: Option<f64>,
    records: Vec<PositionRecord>,
) -> Result<ParsedReport, ParseError> {
    let snapshot = net_asset_value.map(|nav| FundSnapshot {
        fund_local_id: report.fund_local_id,
        reference_date,
        net_asset_value: nav,
        quota_value: None,
        quota_quantity: None,
    });
    if records.is_empty() && snapshot.is_none() {
        return Err(ParseError::MissingSection {
            file: report.file_name.clone(),
            section: "nenhuma seção de posição reconhecida".into(),
        });
    }
    Ok(ParsedReport {
        reference_date,
        snapshot,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Cell {
        Cell::Text(s.into())
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    fn e() -> Cell {
        Cell::Empty
    }

    fn report(name: &str) -> RawReport {
        RawReport {
            file_name: name.into(),
            fund_local_id: 7,
            bytes: Vec::new(),
        }
    }

    #[test]
    fn legacy_sections_scan_between_markers() {
        let grid = vec![
            vec![t("Posição em: 14/03/2025"), e(), e()],
            vec![e(), t("Ações"), e()],
            vec![e(), t("Papel"), t("Quantidade")],
            vec![e(), t("PETR4"), n(1000.0), n(38.0), n(38_000.0)],
            vec![e(), t("VALE3"), n(500.0), n(60.0), n(30_000.0)],
            vec![e(), t("Total Ações:"), n(68_000.0)],
            vec![e(), t("Saldos em Conta Corrente"), e()],
            vec![e(), t("Banco Alfa"), n(50_000.0)],
            vec![e(), t("Patrimônio Fechamento"), n(1_500_000.0)],
        ];
        let parsed = scan_legacy(&report("14.03 - Carteira Excel - FIP.xlsx"), &grid).unwrap();
        assert_eq!(parsed.reference_date.to_string(), "2025-03-14");
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(
            parsed.snapshot.as_ref().unwrap().net_asset_value,
            1_500_000.0
        );
        let equity: Vec<_> = parsed
            .records
            .iter()
            .filter(|r| r.attributes.category() == PositionCategory::Equity)
            .collect();
        assert_eq!(equity.len(), 2);
        assert_eq!(equity[0].instrument_key, "petr4");
        match &equity[0].attributes {
            PositionAttributes::Equity {
                quantity,
                unit_price,
                market_value,
                ..
            } => {
                assert_eq!(*quantity, 1000.0);
                assert_eq!(*unit_price, 38.0);
                assert_eq!(*market_value, 38_000.0);
            }
            other => panic!("unexpected attributes: {other:?}"),
        }
        let cash = parsed
            .records
            .iter()
            .find(|r| r.attributes.category() == PositionCategory::Cash)
            .unwrap();
        assert_eq!(cash.attributes.value(), 50_000.0);
    }

    #[test]
    fn legacy_without_date_names_the_missing_section() {
        let grid = vec![vec![t("sem data aqui")]];
        let err = scan_legacy(&report("x.xlsx"), &grid).unwrap_err();
        assert!(
            matches!(err, ParseError::MissingSection { section, .. } if section.contains("data"))
        );
    }

    #[test]
    fn current_layout_uses_named_columns() {
        let grid = vec![
            vec![t("CARTEIRA DIÁRIA"), e(), e(), e(), e()],
            vec![t("Data: 14/03/2025"), e(), e(), e(), e()],
            vec![t("Seção"), t("Descrição"), t("Quantidade"), t("Preço"), t("Valor")],
            vec![t("Caixa"), e(), e(), e(), e()],
            vec![e(), t("Banco Alfa"), e(), e(), n(50_000.0)],
            vec![t("Renda Variável"), e(), e(), e(), e()],
            vec![e(), t("PETR4"), n(1000.0), n(38.0), n(38_000.0)],
            vec![t("Valores a Pagar"), e(), e(), e(), e()],
            vec![e(), t("Taxa de administração"), e(), e(), n(2500.0)],
            vec![t("Patrimônio"), e(), e(), e(), n(1_500_000.0)],
        ];
        let parsed =
            scan_current(&report("CARTEIRA_DIARIA_FIP_20250314.xlsx"), &grid).unwrap();
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(
            parsed.snapshot.as_ref().unwrap().net_asset_value,
            1_500_000.0
        );
        let payable = parsed
            .records
            .iter()
            .find(|r| r.attributes.category() == PositionCategory::Accrual)
            .unwrap();
        assert_eq!(payable.attributes.value(), -2500.0);
        let equity = parsed
            .records
            .iter()
            .find(|r| r.attributes.category() == PositionCategory::Equity)
            .unwrap();
        match &equity.attributes {
            PositionAttributes::Equity { quantity, .. } => assert_eq!(*quantity, 1000.0),
            other => panic!("unexpected attributes: {other:?}"),
        }
    }

    #[test]
    fn header_detection_requires_description_and_value() {
        assert!(detect_columns(&[t("Descrição"), t("Quantidade"), t("Valor")]).is_some());
        assert!(detect_columns(&[t("Descrição"), t("Quantidade")]).is_none());
        assert!(detect_columns(&[t("PETR4"), n(1.0)]).is_none());
    }

    #[test]
    fn sheet_date_reads_labeled_cells() {
        let grid = vec![vec![t("Posição em: 14/03/2025")]];
        assert_eq!(sheet_date(&grid).unwrap().to_string(), "2025-03-14");
        let iso = vec![vec![e(), t("2025-03-14")]];
        assert_eq!(sheet_date(&iso).unwrap().to_string(), "2025-03-14");
    }

    #[test]
    fn serial_date_cells_flatten_to_iso_text() {
        use calamine::{ExcelDateTime, ExcelDateTimeType};

        // Serial 45730 against the 1900 epoch is 2025-03-14.
        let serial = ExcelDateTime::new(45730.0, ExcelDateTimeType::DateTime, false);
        let cell = cell_from_data(&Data::DateTime(serial));
        assert_eq!(cell, Cell::Text("2025-03-14".into()));
        let grid = vec![vec![cell]];
        assert_eq!(sheet_date(&grid).unwrap().to_string(), "2025-03-14");
    }
}
