//! Embedded storage: the primary relational store the pipeline loads into
//! and the year-partitioned analytical warehouse it migrates into.

pub mod migrate;
pub mod primary;
pub mod warehouse;

use thiserror::Error;

pub const CRATE_NAME: &str = "fpp-store";

pub use migrate::{MigrationEngine, MigrationResult, MigrationTypeError};
pub use primary::{LoadBatch, LoadEngine, LoadResult, PrimaryStore, SliceFailure};
pub use warehouse::Warehouse;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
