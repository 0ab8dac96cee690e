//! Analytical warehouse: reference tables plus per-year position
//! partitions (`pos_<category>_<year>`) created on first write.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use fpp_core::PositionCategory;

use crate::StoreError;

const REFERENCE_SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS ref_funds (
        fund_local_id INTEGER PRIMARY KEY,
        display_name TEXT NOT NULL,
        tax_id TEXT NOT NULL,
        fund_kind TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ref_instruments (
        instrument_key TEXT NOT NULL,
        category TEXT NOT NULL,
        description TEXT NOT NULL,
        PRIMARY KEY (instrument_key, category)
    )",
];

/// Partition table name for one category and year.
pub fn partition_table(category: PositionCategory, year: i32) -> String {
    format!("pos_{}_{}", category.as_str(), year)
}

/// Partition table name for the NAV snapshots of one year.
pub fn nav_partition_table(year: i32) -> String {
    format!("pos_nav_{year}")
}

#[derive(Clone)]
pub struct Warehouse {
    pool: SqlitePool,
}

impl Warehouse {
    pub async fn connect(path: &str) -> Result<Warehouse, StoreError> {
        let options = SqliteConnectOptions::from_str(path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        for statement in REFERENCE_SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Warehouse { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn upsert_ref_fund(
        &self,
        fund_local_id: i64,
        display_name: &str,
        tax_id: &str,
        fund_kind: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ref_funds (fund_local_id, display_name, tax_id, fund_kind)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(fund_local_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 tax_id = excluded.tax_id,
                 fund_kind = excluded.fund_kind",
        )
        .bind(fund_local_id)
        .bind(display_name)
        .bind(tax_id)
        .bind(fund_kind)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_ref_instrument(
        &self,
        instrument_key: &str,
        category: PositionCategory,
        description: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ref_instruments (instrument_key, category, description)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(instrument_key, category) DO UPDATE SET
                 description = excluded.description",
        )
        .bind(instrument_key)
        .bind(category.as_str())
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Creates the partition for `(category, year)` when it does not exist
    /// yet and returns its name. Names are assembled from closed enum
    /// values and an integer year, never from external input.
    pub async fn ensure_partition(
        &self,
        category: PositionCategory,
        year: i32,
    ) -> Result<String, StoreError> {
        let table = partition_table(category, year);
        let created = !self.table_exists(&table).await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                fund_local_id INTEGER NOT NULL REFERENCES ref_funds(fund_local_id),
                reference_date TEXT NOT NULL,
                total_value REAL NOT NULL,
                position_count INTEGER NOT NULL,
                migrated_at TEXT NOT NULL,
                PRIMARY KEY (fund_local_id, reference_date)
            )"
        ))
        .execute(&self.pool)
        .await?;
        if created {
            info!(%table, "created warehouse partition");
        }
        Ok(table)
    }

    pub async fn ensure_nav_partition(&self, year: i32) -> Result<String, StoreError> {
        let table = nav_partition_table(year);
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                fund_local_id INTEGER NOT NULL REFERENCES ref_funds(fund_local_id),
                reference_date TEXT NOT NULL,
                net_asset_value REAL NOT NULL,
                quota_value REAL,
                quota_quantity REAL,
                migrated_at TEXT NOT NULL,
                PRIMARY KEY (fund_local_id, reference_date)
            )"
        ))
        .execute(&self.pool)
        .await?;
        Ok(table)
    }

    /// Upserts one aggregate row; re-migrations replace, never duplicate.
    pub async fn upsert_position_aggregate(
        &self,
        table: &str,
        fund_local_id: i64,
        reference_date: &str,
        total_value: f64,
        position_count: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO {table}
                 (fund_local_id, reference_date, total_value, position_count, migrated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(fund_local_id, reference_date) DO UPDATE SET
                 total_value = excluded.total_value,
                 position_count = excluded.position_count,
                 migrated_at = excluded.migrated_at"
        ))
        .bind(fund_local_id)
        .bind(reference_date)
        .bind(total_value)
        .bind(position_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_nav_row(
        &self,
        table: &str,
        fund_local_id: i64,
        reference_date: &str,
        net_asset_value: f64,
        quota_value: Option<f64>,
        quota_quantity: Option<f64>,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO {table}
                 (fund_local_id, reference_date, net_asset_value, quota_value, quota_quantity, migrated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
             ON CONFLICT(fund_local_id, reference_date) DO UPDATE SET
                 net_asset_value = excluded.net_asset_value,
                 quota_value = excluded.quota_value,
                 quota_quantity = excluded.quota_quantity,
                 migrated_at = excluded.migrated_at"
        ))
        .bind(fund_local_id)
        .bind(reference_date)
        .bind(net_asset_value)
        .bind(quota_value)
        .bind(quota_quantity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn row_count(&self, table: &str) -> Result<i64, StoreError> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn warehouse() -> (tempfile::TempDir, Warehouse) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warehouse.db");
        let wh = Warehouse::connect(path.to_str().unwrap()).await.unwrap();
        (dir, wh)
    }

    #[test]
    fn partition_names_follow_category_and_year() {
        assert_eq!(
            partition_table(PositionCategory::Cash, 2025),
            "pos_cash_2025"
        );
        assert_eq!(
            partition_table(PositionCategory::FixedIncome, 2024),
            "pos_fixed_income_2024"
        );
        assert_eq!(nav_partition_table(2025), "pos_nav_2025");
    }

    #[tokio::test]
    async fn new_year_creates_its_partition_on_demand() {
        let (_dir, wh) = warehouse().await;
        assert!(!wh.table_exists("pos_cash_2026").await.unwrap());
        let table = wh
            .ensure_partition(PositionCategory::Cash, 2026)
            .await
            .unwrap();
        assert_eq!(table, "pos_cash_2026");
        assert!(wh.table_exists("pos_cash_2026").await.unwrap());
    }

    #[tokio::test]
    async fn aggregate_upsert_replaces_on_conflict() {
        let (_dir, wh) = warehouse().await;
        wh.upsert_ref_fund(1, "FIP Teste", "00.000.000/0001-00", "FIP")
            .await
            .unwrap();
        let table = wh
            .ensure_partition(PositionCategory::Cash, 2025)
            .await
            .unwrap();
        wh.upsert_position_aggregate(&table, 1, "2025-03-01", 100.0, 2)
            .await
            .unwrap();
        wh.upsert_position_aggregate(&table, 1, "2025-03-01", 150.0, 3)
            .await
            .unwrap();
        assert_eq!(wh.row_count(&table).await.unwrap(), 1);
        let total = sqlx::query(&format!("SELECT total_value FROM {table}"))
            .fetch_one(wh.pool())
            .await
            .unwrap()
            .get::<f64, _>("total_value");
        assert_eq!(total, 150.0);
    }
}
