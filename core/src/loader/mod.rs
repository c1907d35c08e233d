//! Idempotent staged upsert of one batch into one target table.
//!
//! A load runs in fixed phases: validate, stamp, stage to a temporary file, make sure the target
//! exists, create a staging table, ingest the staged rows (casting each cell and skipping rows that
//! do not fit), merge staging into target in one statement, and finally drop the staging table and
//! the temporary file whatever happened before.

mod cast;
mod staging;

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Instant};

use chrono::{NaiveDateTime, Timelike, Utc};
use tracing::{debug, error, info, warn};

pub use cast::{cast_value, CastError};
pub use staging::{stage_batch, StagedBatch, StagingError};

use crate::{
    batch::Batch,
    database::{
        sql_type_wrapper::SqlValue, MergeCounts, Warehouse, WarehouseError, WarehouseSession,
    },
    helpers::format_duration,
    schema::{ColumnDefinition, TableSchema, LOAD_TS_COLUMN},
    simple_file_formatters::csv::AsyncCsvAppender,
};

/// One merge operation: a batch for a table plus the timestamp stamped on all of its rows.
#[derive(Debug, Clone)]
pub struct UpsertJob {
    pub schema: TableSchema,
    pub batch: Batch,
    pub load_timestamp: NaiveDateTime,
}

impl UpsertJob {
    /// Captures the load timestamp once, truncated to whole seconds.
    pub fn new(schema: TableSchema, batch: Batch) -> Self {
        let now = Utc::now().naive_utc();
        let load_timestamp = now.with_nanosecond(0).unwrap_or(now);
        Self { schema, batch, load_timestamp }
    }

    pub fn with_load_timestamp(mut self, load_timestamp: NaiveDateTime) -> Self {
        self.load_timestamp = load_timestamp;
        self
    }
}

/// A staged row that could not be cast to the target types and was left out of the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestError {
    /// 1-based position of the row in the job's batch.
    pub row_number: usize,
    /// Merge key of the row, `None` when the key itself is missing.
    pub key: Option<String>,
    pub column: String,
    pub value: Option<String>,
    pub reason: String,
    /// Every loaded cell of the row as staged, enough to fix and replay it.
    pub row: Vec<(String, Option<String>)>,
}

impl IngestError {
    fn to_record(&self, load_timestamp: &str) -> Vec<String> {
        let row: serde_json::Map<String, serde_json::Value> = self
            .row
            .iter()
            .map(|(column, value)| {
                let value = value.clone().map_or(serde_json::Value::Null, serde_json::Value::String);
                (column.clone(), value)
            })
            .collect();

        vec![
            load_timestamp.to_string(),
            self.row_number.to_string(),
            self.key.clone().unwrap_or_default(),
            self.column.clone(),
            self.value.clone().unwrap_or_default(),
            self.reason.clone(),
            serde_json::Value::Object(row).to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertResult {
    pub target_table: String,
    pub rows_attempted: usize,
    pub rows_staged: u64,
    pub duplicate_keys_collapsed: usize,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    /// Declared columns absent from the batch, the load went ahead without them.
    pub missing_columns: Vec<String>,
    pub ingest_errors: Vec<IngestError>,
    pub load_timestamp: NaiveDateTime,
}

impl UpsertResult {
    pub fn rows_rejected(&self) -> usize {
        self.ingest_errors.len()
    }

    /// Some rows were attempted but did not land in staging.
    pub fn is_partial(&self) -> bool {
        !self.ingest_errors.is_empty()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum UpsertError {
    #[error("Batch for {0} has no rows")]
    EmptyBatch(String),

    #[error("Batch for {0} does not match its schema: {1}")]
    Schema(String, String),

    #[error("Warehouse connection unavailable: {0}")]
    Connection(WarehouseError),

    #[error("Could not stage batch for {0}: {1}")]
    Staging(String, StagingError),

    #[error("Could not create target table {0}: {1}")]
    TargetCreation(String, WarehouseError),

    #[error("Could not create staging table for {0}: {1}")]
    StagingTableCreation(String, WarehouseError),

    #[error("Bulk ingest into staging for {0} failed: {1}")]
    Ingest(String, WarehouseError),

    #[error("Merge into {0} failed, target left unchanged: {1}")]
    MergeFailure(String, WarehouseError),
}

#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Directory receiving `<table>_rejects.csv` for rows skipped during ingest.
    pub rejects_path: Option<PathBuf>,
    /// Directory for the temporary staging files, the system temp directory when unset.
    pub staging_path: Option<PathBuf>,
}

const REJECTS_HEADER: [&str; 7] =
    ["LOAD_TS", "ROW_NUMBER", "MERGE_KEY", "COLUMN", "VALUE", "REASON", "ROW"];

/// Runs [`UpsertJob`]s against a [`Warehouse`], one table descriptor drives every entity.
pub struct UpsertLoader<W: Warehouse + ?Sized = dyn Warehouse> {
    warehouse: Arc<W>,
    options: LoaderOptions,
}

struct Ingested {
    rows: Vec<Vec<SqlValue>>,
    ingest_errors: Vec<IngestError>,
    duplicate_keys_collapsed: usize,
}

fn staged_cells(columns: &[ColumnDefinition], row: &[Option<String>]) -> Vec<(String, Option<String>)> {
    columns
        .iter()
        .zip(row)
        .filter(|(column, _)| column.name != LOAD_TS_COLUMN)
        .map(|(column, value)| (column.name.clone(), value.clone()))
        .collect()
}

/// Collapses repeated merge keys so only the last occurrence of each key is kept, then casts the
/// survivors, skipping any row with a cell that does not fit its column.
///
/// Superseded copies are dropped before casting, so a key whose last occurrence is malformed is
/// rejected as a whole rather than falling back to an older copy.
fn cast_staged_rows(
    rows: Vec<Vec<Option<String>>>,
    columns: &[ColumnDefinition],
    key_index: usize,
) -> Ingested {
    let raw_key = |row: &[Option<String>]| -> Option<String> {
        row.get(key_index).cloned().flatten().filter(|key| !key.is_empty())
    };

    let mut last_positions: HashMap<String, usize> = HashMap::new();
    for (index, row) in rows.iter().enumerate() {
        if let Some(key) = raw_key(row) {
            last_positions.insert(key, index);
        }
    }

    let mut ingest_errors = Vec::new();
    let mut cast_rows = Vec::with_capacity(last_positions.len());
    let mut duplicate_keys_collapsed = 0;

    'rows: for (index, row) in rows.into_iter().enumerate() {
        let key = raw_key(&row);
        if let Some(key) = &key {
            if last_positions.get(key) != Some(&index) {
                duplicate_keys_collapsed += 1;
                continue;
            }
        }

        let mut values = Vec::with_capacity(columns.len());
        for (column, raw) in columns.iter().zip(row.iter()) {
            match cast_value(column, raw.as_deref()) {
                Ok(value) => values.push(value),
                Err(e) => {
                    ingest_errors.push(IngestError {
                        row_number: index + 1,
                        key: key.clone(),
                        column: column.name.clone(),
                        value: raw.clone(),
                        reason: e.to_string(),
                        row: staged_cells(columns, &row),
                    });
                    continue 'rows;
                }
            }
        }
        cast_rows.push(values);
    }

    Ingested { rows: cast_rows, ingest_errors, duplicate_keys_collapsed }
}

/// Declared columns present in the batch (in declared order) followed by the load timestamp,
/// plus the declared columns that are missing.
fn resolve_load_columns(job: &UpsertJob) -> Result<(Vec<ColumnDefinition>, Vec<String>), UpsertError> {
    let table = job.schema.table();

    if job.batch.is_empty() {
        return Err(UpsertError::EmptyBatch(table.to_string()));
    }

    if job.batch.column_index(job.schema.merge_key()).is_none() {
        return Err(UpsertError::Schema(
            table.to_string(),
            format!("merge key {} is not a column of the batch", job.schema.merge_key()),
        ));
    }

    let mut columns = Vec::new();
    let mut missing = Vec::new();
    for column in job.schema.columns() {
        if job.batch.column_index(&column.name).is_some() {
            columns.push(column.clone());
        } else {
            missing.push(column.name.clone());
        }
    }

    let unexpected: Vec<&String> =
        job.batch.columns().iter().filter(|c| job.schema.column(c).is_none()).collect();
    if !unexpected.is_empty() {
        warn!("{} - ignoring columns not declared on the table: {:?}", table, unexpected);
    }
    if !missing.is_empty() {
        warn!("{} - declared columns absent from the batch, loading without them: {:?}", table, missing);
    }

    if let Some(load_ts) = job.schema.all_columns().pop() {
        columns.push(load_ts);
    }

    Ok((columns, missing))
}

impl<W: Warehouse + ?Sized> UpsertLoader<W> {
    pub fn new(warehouse: Arc<W>) -> Self {
        Self::with_options(warehouse, LoaderOptions::default())
    }

    pub fn with_options(warehouse: Arc<W>, options: LoaderOptions) -> Self {
        Self { warehouse, options }
    }

    pub fn warehouse(&self) -> &Arc<W> {
        &self.warehouse
    }

    pub async fn upsert(&self, job: UpsertJob) -> Result<UpsertResult, UpsertError> {
        let start = Instant::now();
        let table = job.schema.table().to_string();

        let (columns, missing_columns) = resolve_load_columns(&job)?;
        info!(
            "{} - loading {} rows stamped {} into {}",
            table,
            job.batch.len(),
            job.load_timestamp,
            self.warehouse.name()
        );

        let column_names: Vec<&str> = columns
            .iter()
            .filter(|c| c.name != LOAD_TS_COLUMN)
            .map(|c| c.name.as_str())
            .collect();
        let mut staged = stage_batch(
            &job.batch,
            &column_names,
            job.load_timestamp,
            self.options.staging_path.as_deref(),
        )
        .map_err(|e| UpsertError::Staging(table.clone(), e))?;
        debug!("{} - staged {} rows at {}", table, staged.len(), staged.path().display());

        let outcome = self.load_staged(&job, &columns, &mut staged).await;

        if let Err(e) = staged.remove() {
            warn!("{} - could not remove staging file: {}", table, e);
        }

        let (ingested, rows_staged, counts) = outcome?;

        if !ingested.ingest_errors.is_empty() {
            warn!(
                "{} - {} of {} rows rejected during ingest",
                table,
                ingested.ingest_errors.len(),
                job.batch.len()
            );
            self.write_rejects(&table, job.load_timestamp, &ingested.ingest_errors).await;
        }

        let result = UpsertResult {
            target_table: table.clone(),
            rows_attempted: job.batch.len(),
            rows_staged,
            duplicate_keys_collapsed: ingested.duplicate_keys_collapsed,
            rows_inserted: counts.inserted,
            rows_updated: counts.updated,
            missing_columns,
            ingest_errors: ingested.ingest_errors,
            load_timestamp: job.load_timestamp,
        };

        info!(
            "{} - merged {} staged rows ({} inserted, {} updated) - took {}",
            table,
            result.rows_staged,
            result.rows_inserted,
            result.rows_updated,
            format_duration(start.elapsed())
        );

        Ok(result)
    }

    /// Everything that needs the warehouse session. The staging table is dropped on every path
    /// once it has been created.
    async fn load_staged(
        &self,
        job: &UpsertJob,
        columns: &[ColumnDefinition],
        staged: &mut StagedBatch,
    ) -> Result<(Ingested, u64, MergeCounts), UpsertError> {
        let table = job.schema.table();

        let mut session = self.warehouse.session().await.map_err(UpsertError::Connection)?;

        session
            .ensure_target_table(&job.schema)
            .await
            .map_err(|e| UpsertError::TargetCreation(table.to_string(), e))?;

        let staging_table = session
            .create_staging_table(&job.schema)
            .await
            .map_err(|e| UpsertError::StagingTableCreation(table.to_string(), e))?;

        let outcome = ingest_and_merge(session.as_mut(), job, columns, staged, &staging_table).await;

        if let Err(e) = session.drop_staging_table(&staging_table).await {
            warn!("{} - could not drop staging table {}: {}", table, staging_table, e);
        }

        if let Err(e) = &outcome {
            error!("{} - load failed: {}", table, e);
        }
        outcome
    }

    async fn write_rejects(&self, table: &str, load_timestamp: NaiveDateTime, errors: &[IngestError]) {
        let Some(directory) = &self.options.rejects_path else {
            return;
        };

        let appender = AsyncCsvAppender::new(&directory.join(format!("{}_rejects.csv", table)));
        let header = REJECTS_HEADER.iter().map(|h| h.to_string()).collect();
        let stamp = load_timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        let records = errors.iter().map(|error| error.to_record(&stamp)).collect();

        match appender.append_bulk(header, records).await {
            Ok(()) => info!("{} - rejected rows written to {}", table, appender.path().display()),
            Err(e) => warn!("{} - could not write rejected rows: {}", table, e),
        }
    }
}

async fn ingest_and_merge(
    session: &mut dyn WarehouseSession,
    job: &UpsertJob,
    columns: &[ColumnDefinition],
    staged: &mut StagedBatch,
    staging_table: &str,
) -> Result<(Ingested, u64, MergeCounts), UpsertError> {
    let table = job.schema.table();

    let rows = staged.read_rows().map_err(|e| UpsertError::Staging(table.to_string(), e))?;
    let key_index = columns.iter().position(|c| c.name == job.schema.merge_key()).ok_or_else(|| {
        UpsertError::Schema(table.to_string(), format!("merge key {} not loaded", job.schema.merge_key()))
    })?;

    let ingested = cast_staged_rows(rows, columns, key_index);
    if ingested.duplicate_keys_collapsed > 0 {
        warn!(
            "{} - {} repeated merge keys collapsed, last occurrence kept",
            table, ingested.duplicate_keys_collapsed
        );
    }

    let rows_staged = session
        .copy_into_staging(staging_table, columns, &ingested.rows)
        .await
        .map_err(|e| UpsertError::Ingest(table.to_string(), e))?;
    debug!("{} - {} rows copied into {}", table, rows_staged, staging_table);

    let counts = session
        .merge_staging(&job.schema, staging_table, columns)
        .await
        .map_err(|e| UpsertError::MergeFailure(table.to_string(), e))?;

    Ok((ingested, rows_staged, counts))
}
