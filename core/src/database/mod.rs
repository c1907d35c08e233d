pub mod memory;
pub mod postgres;
pub mod sql_type_wrapper;

use async_trait::async_trait;

use crate::schema::{ColumnDefinition, TableSchema};
use sql_type_wrapper::SqlValue;

#[derive(thiserror::Error, Debug)]
pub enum WarehouseError {
    #[error("Could not acquire a warehouse connection: {0}")]
    Connection(String),

    #[error("PgError {0}")]
    PgError(#[from] tokio_postgres::Error),

    #[error("Table {0} does not exist")]
    MissingTable(String),

    #[error("Statement rejected: {0}")]
    Rejected(String),
}

/// Row counts reported by a merge of staging into target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// A storage backend able to host the staged upsert protocol.
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens a session pinned to one connection for the lifetime of a job, staging tables are
    /// only visible inside the session that created them.
    async fn session(&self) -> Result<Box<dyn WarehouseSession>, WarehouseError>;
}

#[async_trait]
pub trait WarehouseSession: Send {
    /// `CREATE TABLE IF NOT EXISTS` with the declared columns plus the load timestamp.
    async fn ensure_target_table(&mut self, schema: &TableSchema) -> Result<(), WarehouseError>;

    /// Creates (or recreates) a staging table mirroring the target, returning its name.
    async fn create_staging_table(&mut self, schema: &TableSchema) -> Result<String, WarehouseError>;

    /// Bulk loads already typed rows, returning how many landed.
    async fn copy_into_staging(
        &mut self,
        staging_table: &str,
        columns: &[ColumnDefinition],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, WarehouseError>;

    /// Reconciles staging into target by the merge key as one indivisible operation.
    async fn merge_staging(
        &mut self,
        schema: &TableSchema,
        staging_table: &str,
        columns: &[ColumnDefinition],
    ) -> Result<MergeCounts, WarehouseError>;

    async fn drop_staging_table(&mut self, staging_table: &str) -> Result<(), WarehouseError>;
}

pub fn staging_table_name(schema: &TableSchema) -> String {
    format!("{}_staging", schema.table())
}
