//! Primary store and the slice-replacement load engine.
//!
//! A slice is every row belonging to one `(fund, reference date)` pair.
//! Loading replaces the whole slice inside one transaction (delete, then
//! insert), which makes re-loading the same report a no-op on row counts.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::{info, warn};

use fpp_core::{FundKind, FundSnapshot, PositionAttributes, PositionCategory, PositionRecord};

use crate::StoreError;

const SCHEMA: [&str; 7] = [
    "CREATE TABLE IF NOT EXISTS funds (
        local_id INTEGER PRIMARY KEY AUTOINCREMENT,
        remote_id TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        tax_id TEXT NOT NULL,
        fund_kind TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS fund_snapshot (
        fund_local_id INTEGER NOT NULL,
        reference_date TEXT NOT NULL,
        net_asset_value REAL NOT NULL,
        quota_value REAL,
        quota_quantity REAL,
        PRIMARY KEY (fund_local_id, reference_date)
    )",
    "CREATE TABLE IF NOT EXISTS positions_cash (
        fund_local_id INTEGER NOT NULL,
        reference_date TEXT NOT NULL,
        instrument_key TEXT NOT NULL,
        description TEXT NOT NULL,
        institution TEXT,
        currency TEXT NOT NULL,
        balance REAL NOT NULL,
        PRIMARY KEY (fund_local_id, reference_date, instrument_key)
    )",
    "CREATE TABLE IF NOT EXISTS positions_fixed_income (
        fund_local_id INTEGER NOT NULL,
        reference_date TEXT NOT NULL,
        instrument_key TEXT NOT NULL,
        description TEXT NOT NULL,
        issuer TEXT,
        quantity REAL NOT NULL,
        unit_price REAL NOT NULL,
        market_value REAL NOT NULL,
        rate TEXT,
        maturity TEXT,
        PRIMARY KEY (fund_local_id, reference_date, instrument_key)
    )",
    "CREATE TABLE IF NOT EXISTS positions_equity (
        fund_local_id INTEGER NOT NULL,
        reference_date TEXT NOT NULL,
        instrument_key TEXT NOT NULL,
        ticker TEXT NOT NULL,
        description TEXT NOT NULL,
        quantity REAL NOT NULL,
        unit_price REAL NOT NULL,
        market_value REAL NOT NULL,
        PRIMARY KEY (fund_local_id, reference_date, instrument_key)
    )",
    "CREATE TABLE IF NOT EXISTS positions_receivable (
        fund_local_id INTEGER NOT NULL,
        reference_date TEXT NOT NULL,
        instrument_key TEXT NOT NULL,
        description TEXT NOT NULL,
        due_date TEXT,
        amount REAL NOT NULL,
        PRIMARY KEY (fund_local_id, reference_date, instrument_key)
    )",
    "CREATE TABLE IF NOT EXISTS positions_accrual (
        fund_local_id INTEGER NOT NULL,
        reference_date TEXT NOT NULL,
        instrument_key TEXT NOT NULL,
        description TEXT NOT NULL,
        due_date TEXT,
        amount REAL NOT NULL,
        PRIMARY KEY (fund_local_id, reference_date, instrument_key)
    )",
];

pub(crate) fn position_table(category: PositionCategory) -> &'static str {
    match category {
        PositionCategory::Cash => "positions_cash",
        PositionCategory::FixedIncome => "positions_fixed_income",
        PositionCategory::Equity => "positions_equity",
        PositionCategory::Receivable => "positions_receivable",
        PositionCategory::Accrual => "positions_accrual",
    }
}

#[derive(Clone)]
pub struct PrimaryStore {
    pool: SqlitePool,
}

impl PrimaryStore {
    /// Opens (and creates, when missing) the store at `path` and applies
    /// the schema.
    pub async fn connect(path: &str) -> Result<PrimaryStore, StoreError> {
        let options = SqliteConnectOptions::from_str(path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(PrimaryStore { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upserts one fund registry entry by remote id and returns the local
    /// id, stable across runs.
    pub async fn ensure_fund(
        &self,
        remote_id: &str,
        display_name: &str,
        tax_id: &str,
        kind: FundKind,
    ) -> Result<i64, StoreError> {
        let local_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO funds (remote_id, display_name, tax_id, fund_kind)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(remote_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 tax_id = excluded.tax_id,
                 fund_kind = excluded.fund_kind
             RETURNING local_id",
        )
        .bind(remote_id)
        .bind(display_name)
        .bind(tax_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(local_id)
    }

    pub async fn position_count(&self, category: PositionCategory) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {}",
            position_table(category)
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn snapshot_count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM fund_snapshot")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoadBatch {
    pub records: Vec<PositionRecord>,
    pub snapshots: Vec<FundSnapshot>,
}

impl LoadBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.snapshots.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SliceFailure {
    pub fund_local_id: i64,
    pub reference_date: NaiveDate,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct LoadResult {
    pub slices_written: usize,
    pub rows_written: usize,
    pub failures: Vec<SliceFailure>,
}

type SliceKey = (i64, NaiveDate);

/// Writes batches into the primary store with one async lock per
/// `(fund, date)` key, so two loads of the same slice serialize while
/// distinct slices proceed independently.
pub struct LoadEngine {
    store: PrimaryStore,
    writers: Mutex<HashMap<SliceKey, Arc<Mutex<()>>>>,
}

impl LoadEngine {
    pub fn new(store: PrimaryStore) -> LoadEngine {
        LoadEngine {
            store,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &PrimaryStore {
        &self.store
    }

    pub async fn load(&self, batch: LoadBatch) -> LoadResult {
        let mut slices: BTreeMap<SliceKey, LoadBatch> = BTreeMap::new();
        for record in batch.records {
            let key = (record.fund_local_id, record.reference_date);
            slices.entry(key).or_default().records.push(record);
        }
        for snapshot in batch.snapshots {
            let key = (snapshot.fund_local_id, snapshot.reference_date);
            slices.entry(key).or_default().snapshots.push(snapshot);
        }

        let mut result = LoadResult::default();
        for (key, slice) in slices {
            let lock = self.writer_lock(key).await;
            let _guard = lock.lock().await;
            match self.replace_slice(key, &slice).await {
                Ok(rows) => {
                    result.slices_written += 1;
                    result.rows_written += rows;
                }
                Err(err) => {
                    warn!(
                        fund = key.0,
                        date = %key.1,
                        error = %err,
                        "slice load failed, continuing with remaining slices"
                    );
                    result.failures.push(SliceFailure {
                        fund_local_id: key.0,
                        reference_date: key.1,
                        error: err.to_string(),
                    });
                }
            }
        }
        info!(
            slices = result.slices_written,
            rows = result.rows_written,
            failures = result.failures.len(),
            "load complete"
        );
        result
    }

    async fn writer_lock(&self, key: SliceKey) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().await;
        Arc::clone(writers.entry(key).or_default())
    }

    /// Delete-then-insert of one slice in a single transaction. Readers
    /// never observe the slice half-written.
    async fn replace_slice(&self, key: SliceKey, slice: &LoadBatch) -> Result<usize, StoreError> {
        let (fund_local_id, reference_date) = key;
        let date_text = reference_date.to_string();
        let mut tx = self.store.pool.begin().await?;

        for category in PositionCategory::ALL {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE fund_local_id = ?1 AND reference_date = ?2",
                position_table(category)
            ))
            .bind(fund_local_id)
            .bind(&date_text)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM fund_snapshot WHERE fund_local_id = ?1 AND reference_date = ?2")
            .bind(fund_local_id)
            .bind(&date_text)
            .execute(&mut *tx)
            .await?;

        let mut rows = 0usize;
        for record in &slice.records {
            insert_record(&mut tx, record).await?;
            rows += 1;
        }
        for snapshot in &slice.snapshots {
            sqlx::query(
                "INSERT INTO fund_snapshot
                     (fund_local_id, reference_date, net_asset_value, quota_value, quota_quantity)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(snapshot.fund_local_id)
            .bind(snapshot.reference_date.to_string())
            .bind(snapshot.net_asset_value)
            .bind(snapshot.quota_value)
            .bind(snapshot.quota_quantity)
            .execute(&mut *tx)
            .await?;
            rows += 1;
        }

        tx.commit().await?;
        Ok(rows)
    }
}

async fn insert_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    record: &PositionRecord,
) -> Result<(), StoreError> {
    let date_text = record.reference_date.to_string();
    match &record.attributes {
        PositionAttributes::Cash {
            description,
            institution,
            currency,
            balance,
        } => {
            sqlx::query(
                "INSERT INTO positions_cash
                     (fund_local_id, reference_date, instrument_key, description, institution, currency, balance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(record.fund_local_id)
            .bind(&date_text)
            .bind(&record.instrument_key)
            .bind(description)
            .bind(institution)
            .bind(currency)
            .bind(balance)
            .execute(&mut **tx)
            .await?;
        }
        PositionAttributes::FixedIncome {
            description,
            issuer,
            quantity,
            unit_price,
            market_value,
            rate,
            maturity,
        } => {
            sqlx::query(
                "INSERT INTO positions_fixed_income
                     (fund_local_id, reference_date, instrument_key, description, issuer,
                      quantity, unit_price, market_value, rate, maturity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(record.fund_local_id)
            .bind(&date_text)
            .bind(&record.instrument_key)
            .bind(description)
            .bind(issuer)
            .bind(quantity)
            .bind(unit_price)
            .bind(market_value)
            .bind(rate)
            .bind(maturity.map(|d| d.to_string()))
            .execute(&mut **tx)
            .await?;
        }
        PositionAttributes::Equity {
            ticker,
            description,
            quantity,
            unit_price,
            market_value,
        } => {
            sqlx::query(
                "INSERT INTO positions_equity
                     (fund_local_id, reference_date, instrument_key, ticker, description,
                      quantity, unit_price, market_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(record.fund_local_id)
            .bind(&date_text)
            .bind(&record.instrument_key)
            .bind(ticker)
            .bind(description)
            .bind(quantity)
            .bind(unit_price)
            .bind(market_value)
            .execute(&mut **tx)
            .await?;
        }
        PositionAttributes::Receivable {
            description,
            due_date,
            amount,
        }
        | PositionAttributes::Accrual {
            description,
            due_date,
            amount,
        } => {
            sqlx::query(&format!(
                "INSERT INTO {}
                     (fund_local_id, reference_date, instrument_key, description, due_date, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                position_table(record.attributes.category())
            ))
            .bind(record.fund_local_id)
            .bind(&date_text)
            .bind(&record.instrument_key)
            .bind(description)
            .bind(due_date.map(|d| d.to_string()))
            .bind(amount)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}
