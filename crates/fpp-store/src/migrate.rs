//! Migration from the primary store into the warehouse.
//!
//! Rows are coerced one by one (text dates to typed dates, locale decimal
//! text to numbers, legacy 8-bit text to unicode) and routed to the
//! partition of their reference year. A row that refuses coercion is
//! skipped and reported, never fatal.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use sqlx::Row;
use thiserror::Error;
use tracing::{info, warn};

use fpp_core::{locale, DateRange, PositionCategory};

use crate::primary::{position_table, PrimaryStore};
use crate::warehouse::Warehouse;
use crate::StoreError;

#[derive(Debug, Clone, Error)]
#[error(
    "fund {fund_local_id} at {reference_date}, instrument {instrument_key}: cannot coerce {field} from {value:?}"
)]
pub struct MigrationTypeError {
    pub fund_local_id: i64,
    pub reference_date: String,
    pub instrument_key: String,
    pub field: &'static str,
    pub value: String,
}

#[derive(Debug)]
pub struct MigrationResult {
    pub label: String,
    pub rows_read: usize,
    pub rows_migrated: usize,
    pub partitions: Vec<String>,
    pub skipped: Vec<MigrationTypeError>,
}

pub struct MigrationEngine {
    primary: PrimaryStore,
    warehouse: Warehouse,
}

struct CoercedRow {
    fund_local_id: i64,
    reference_date: NaiveDate,
    instrument_key: String,
    description: String,
    value: f64,
}

impl MigrationEngine {
    pub fn new(primary: PrimaryStore, warehouse: Warehouse) -> MigrationEngine {
        MigrationEngine { primary, warehouse }
    }

    /// Migrates every category plus the NAV snapshots for `range`.
    pub async fn migrate_all(&self, range: DateRange) -> Result<Vec<MigrationResult>, StoreError> {
        let mut results = Vec::new();
        for category in PositionCategory::ALL {
            results.push(self.migrate_category(category, range).await?);
        }
        results.push(self.migrate_nav(range).await?);
        Ok(results)
    }

    pub async fn migrate_category(
        &self,
        category: PositionCategory,
        range: DateRange,
    ) -> Result<MigrationResult, StoreError> {
        self.sync_ref_funds().await?;

        let value_column = match category {
            PositionCategory::Cash => "balance",
            PositionCategory::FixedIncome | PositionCategory::Equity => "market_value",
            PositionCategory::Receivable | PositionCategory::Accrual => "amount",
        };
        let rate_column = match category {
            PositionCategory::FixedIncome => "rate",
            _ => "NULL AS rate",
        };
        let rows = sqlx::query(&format!(
            "SELECT fund_local_id, reference_date, instrument_key, description,
                    {value_column} AS value, {rate_column}
             FROM {}",
            position_table(category)
        ))
        .fetch_all(self.primary.pool())
        .await?;

        let mut result = MigrationResult {
            label: category.as_str().to_string(),
            rows_read: rows.len(),
            rows_migrated: 0,
            partitions: Vec::new(),
            skipped: Vec::new(),
        };
        let mut aggregates: BTreeMap<(i64, NaiveDate), (f64, i64)> = BTreeMap::new();

        for row in rows {
            let fund_local_id: i64 = row.get("fund_local_id");
            let date_text: String = row.get("reference_date");
            let instrument_key: String = row.get("instrument_key");
            let description_raw: Vec<u8> = row.get("description");
            let value: f64 = row.get("value");
            let rate: Option<String> = row.try_get("rate").unwrap_or(None);

            let reference_date = match locale::parse_date(&date_text) {
                Ok(date) => date,
                Err(_) => {
                    result.skipped.push(MigrationTypeError {
                        fund_local_id,
                        reference_date: date_text.clone(),
                        instrument_key,
                        field: "reference_date",
                        value: date_text,
                    });
                    continue;
                }
            };
            if !range.contains(reference_date) {
                continue;
            }
            // Delivered rates are locale text; a garbled one poisons the row.
            if let Some(rate) = rate.as_deref().filter(|r| !r.trim().is_empty()) {
                if locale::parse_decimal(rate).is_err() {
                    result.skipped.push(MigrationTypeError {
                        fund_local_id,
                        reference_date: date_text,
                        instrument_key,
                        field: "rate",
                        value: rate.to_string(),
                    });
                    continue;
                }
            }
            let coerced = CoercedRow {
                fund_local_id,
                reference_date,
                instrument_key,
                description: locale::decode_text(&description_raw),
                value,
            };

            self.warehouse
                .upsert_ref_instrument(&coerced.instrument_key, category, &coerced.description)
                .await?;
            let entry = aggregates
                .entry((coerced.fund_local_id, coerced.reference_date))
                .or_insert((0.0, 0));
            entry.0 += coerced.value;
            entry.1 += 1;
            result.rows_migrated += 1;
        }

        for ((fund_local_id, reference_date), (total_value, position_count)) in aggregates {
            let table = self
                .warehouse
                .ensure_partition(category, reference_date.year())
                .await?;
            self.warehouse
                .upsert_position_aggregate(
                    &table,
                    fund_local_id,
                    &reference_date.to_string(),
                    total_value,
                    position_count,
                )
                .await?;
            if !result.partitions.contains(&table) {
                result.partitions.push(table);
            }
        }

        if !result.skipped.is_empty() {
            warn!(
                label = %result.label,
                skipped = result.skipped.len(),
                "rows skipped during migration"
            );
        }
        info!(
            label = %result.label,
            read = result.rows_read,
            migrated = result.rows_migrated,
            partitions = result.partitions.len(),
            "category migration complete"
        );
        Ok(result)
    }

    pub async fn migrate_nav(&self, range: DateRange) -> Result<MigrationResult, StoreError> {
        self.sync_ref_funds().await?;
        let rows = sqlx::query(
            "SELECT fund_local_id, reference_date, net_asset_value, quota_value, quota_quantity
             FROM fund_snapshot",
        )
        .fetch_all(self.primary.pool())
        .await?;

        let mut result = MigrationResult {
            label: "nav".to_string(),
            rows_read: rows.len(),
            rows_migrated: 0,
            partitions: Vec::new(),
            skipped: Vec::new(),
        };
        for row in rows {
            let fund_local_id: i64 = row.get("fund_local_id");
            let date_text: String = row.get("reference_date");
            let reference_date = match locale::parse_date(&date_text) {
                Ok(date) => date,
                Err(_) => {
                    result.skipped.push(MigrationTypeError {
                        fund_local_id,
                        reference_date: date_text.clone(),
                        instrument_key: String::new(),
                        field: "reference_date",
                        value: date_text,
                    });
                    continue;
                }
            };
            if !range.contains(reference_date) {
                continue;
            }
            let table = self
                .warehouse
                .ensure_nav_partition(reference_date.year())
                .await?;
            self.warehouse
                .upsert_nav_row(
                    &table,
                    fund_local_id,
                    &reference_date.to_string(),
                    row.get("net_asset_value"),
                    row.get("quota_value"),
                    row.get("quota_quantity"),
                )
                .await?;
            if !result.partitions.contains(&table) {
                result.partitions.push(table);
            }
            result.rows_migrated += 1;
        }
        Ok(result)
    }

    async fn sync_ref_funds(&self) -> Result<(), StoreError> {
        let funds = sqlx::query("SELECT local_id, display_name, tax_id, fund_kind FROM funds")
            .fetch_all(self.primary.pool())
            .await?;
        for fund in funds {
            self.warehouse
                .upsert_ref_fund(
                    fund.get("local_id"),
                    &fund.get::<String, _>("display_name"),
                    &fund.get::<String, _>("tax_id"),
                    &fund.get::<String, _>("fund_kind"),
                )
                .await?;
        }
        Ok(())
    }
}
