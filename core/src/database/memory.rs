//! In-process warehouse used for dry runs and tests.
//!
//! It keeps the guarantees the loader relies on from Postgres: staging tables are private to a
//! session, the target key is unique and non-null, and a merge either applies completely or not at
//! all.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;

use crate::{
    database::{
        sql_type_wrapper::SqlValue, staging_table_name, MergeCounts, Warehouse, WarehouseError,
        WarehouseSession,
    },
    schema::{ColumnDefinition, TableSchema},
};

#[derive(Debug, Clone)]
struct TargetTable {
    columns: Vec<ColumnDefinition>,
    key_index: usize,
    rows: BTreeMap<String, Vec<SqlValue>>,
}

#[derive(Debug, Clone)]
struct StagingTable {
    columns: Vec<ColumnDefinition>,
    rows: Vec<Vec<SqlValue>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    targets: HashMap<String, TargetTable>,
    // (session id, staging table name)
    staging: HashMap<(u64, String), StagingTable>,
    fail_next_merge: Option<String>,
    fail_next_copy: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<MemoryState>>,
    next_session: Arc<AtomicU64>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // a poisoned lock only means a panicking test, the state itself is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next merge fail with `message` after staging has been loaded.
    pub fn fail_next_merge(&self, message: &str) {
        self.lock().fail_next_merge = Some(message.to_string());
    }

    /// Makes the next COPY into a staging table fail with `message`.
    pub fn fail_next_copy(&self, message: &str) {
        self.lock().fail_next_copy = Some(message.to_string());
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().targets.contains_key(table)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().targets.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// Merge keys currently present in `table`, in key order.
    pub fn keys(&self, table: &str) -> Vec<String> {
        self.lock().targets.get(table).map(|t| t.rows.keys().cloned().collect()).unwrap_or_default()
    }

    /// One row as column name -> value.
    pub fn row(&self, table: &str, key: &str) -> Option<HashMap<String, SqlValue>> {
        let state = self.lock();
        let target = state.targets.get(table)?;
        let row = target.rows.get(key)?;
        Some(target.columns.iter().map(|c| c.name.clone()).zip(row.iter().cloned()).collect())
    }

    pub fn value(&self, table: &str, key: &str, column: &str) -> Option<SqlValue> {
        self.row(table, key).and_then(|mut row| row.remove(column))
    }

    /// Full contents of `table` keyed by merge key, for comparing snapshots.
    pub fn snapshot(&self, table: &str) -> BTreeMap<String, Vec<SqlValue>> {
        self.lock().targets.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// Staging tables that have been created and not dropped, across all sessions.
    pub fn staging_tables(&self) -> Vec<String> {
        self.lock().staging.keys().map(|(_, name)| name.clone()).collect()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn session(&self) -> Result<Box<dyn WarehouseSession>, WarehouseError> {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession { warehouse: self.clone(), id }))
    }
}

struct MemorySession {
    warehouse: MemoryWarehouse,
    id: u64,
}

fn project_row(
    target_columns: &[ColumnDefinition],
    columns: &[ColumnDefinition],
    row: &[SqlValue],
) -> Result<Vec<SqlValue>, WarehouseError> {
    if row.len() != columns.len() {
        return Err(WarehouseError::Rejected(format!(
            "row has {} values for {} columns",
            row.len(),
            columns.len()
        )));
    }

    target_columns
        .iter()
        .map(|target| match columns.iter().position(|c| c.name == target.name) {
            Some(index) => Ok(row[index].clone()),
            None => Ok(SqlValue::null_for(&target.column_type)),
        })
        .collect()
}

fn check_row(columns: &[ColumnDefinition], row: &[SqlValue]) -> Result<(), WarehouseError> {
    for (column, value) in columns.iter().zip(row) {
        if !column.nullable && value.is_null() {
            return Err(WarehouseError::Rejected(format!(
                "null value in column \"{}\" violates not-null constraint",
                column.name
            )));
        }
        if let SqlValue::Text(Some(text)) = value {
            if text.contains('\0') {
                return Err(WarehouseError::Rejected(format!(
                    "invalid byte sequence for encoding \"UTF8\": 0x00 in column \"{}\"",
                    column.name
                )));
            }
        }
    }
    Ok(())
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        // temporary tables vanish with their session
        let id = self.id;
        self.warehouse.lock().staging.retain(|(session, _), _| *session != id);
    }
}

#[async_trait]
impl WarehouseSession for MemorySession {
    async fn ensure_target_table(&mut self, schema: &TableSchema) -> Result<(), WarehouseError> {
        let columns = schema.all_columns();
        let key_index = columns
            .iter()
            .position(|c| c.name == schema.merge_key())
            .ok_or_else(|| WarehouseError::Rejected(format!("no column {}", schema.merge_key())))?;

        self.warehouse.lock().targets.entry(schema.table().to_string()).or_insert(TargetTable {
            columns,
            key_index,
            rows: BTreeMap::new(),
        });
        Ok(())
    }

    async fn create_staging_table(&mut self, schema: &TableSchema) -> Result<String, WarehouseError> {
        let mut state = self.warehouse.lock();
        let columns = state
            .targets
            .get(schema.table())
            .map(|t| t.columns.clone())
            .ok_or_else(|| WarehouseError::MissingTable(schema.table().to_string()))?;

        let staging_table = staging_table_name(schema);
        state
            .staging
            .insert((self.id, staging_table.clone()), StagingTable { columns, rows: Vec::new() });
        Ok(staging_table)
    }

    async fn copy_into_staging(
        &mut self,
        staging_table: &str,
        columns: &[ColumnDefinition],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, WarehouseError> {
        let mut state = self.warehouse.lock();
        if let Some(message) = state.fail_next_copy.take() {
            return Err(WarehouseError::Rejected(message));
        }

        let staging = state
            .staging
            .get_mut(&(self.id, staging_table.to_string()))
            .ok_or_else(|| WarehouseError::MissingTable(staging_table.to_string()))?;

        let mut projected = Vec::with_capacity(rows.len());
        for row in rows {
            let row = project_row(&staging.columns, columns, row)?;
            check_row(&staging.columns, &row)?;
            projected.push(row);
        }

        // COPY is all or nothing
        staging.rows.extend(projected);
        Ok(rows.len() as u64)
    }

    async fn merge_staging(
        &mut self,
        schema: &TableSchema,
        staging_table: &str,
        columns: &[ColumnDefinition],
    ) -> Result<MergeCounts, WarehouseError> {
        let mut state = self.warehouse.lock();

        if let Some(message) = state.fail_next_merge.take() {
            return Err(WarehouseError::Rejected(message));
        }

        let staging = state
            .staging
            .get(&(self.id, staging_table.to_string()))
            .cloned()
            .ok_or_else(|| WarehouseError::MissingTable(staging_table.to_string()))?;
        let target = state
            .targets
            .get(schema.table())
            .ok_or_else(|| WarehouseError::MissingTable(schema.table().to_string()))?;

        // work on a copy so a failure part way leaves the target untouched
        let mut merged = target.clone();
        let update_indexes: Vec<usize> = merged
            .columns
            .iter()
            .enumerate()
            .filter(|(index, column)| {
                *index != merged.key_index && columns.iter().any(|c| c.name == column.name)
            })
            .map(|(index, _)| index)
            .collect();

        let mut counts = MergeCounts::default();
        let mut touched = HashSet::new();
        for row in staging.rows {
            let key = row[merged.key_index].as_key().ok_or_else(|| {
                WarehouseError::Rejected(format!(
                    "null value in column \"{}\" violates not-null constraint",
                    schema.merge_key()
                ))
            })?;

            if !touched.insert(key.clone()) {
                return Err(WarehouseError::Rejected(format!(
                    "ON CONFLICT DO UPDATE command cannot affect row a second time: key {}",
                    key
                )));
            }

            match merged.rows.get_mut(&key) {
                Some(existing) => {
                    for index in &update_indexes {
                        existing[*index] = row[*index].clone();
                    }
                    counts.updated += 1;
                }
                None => {
                    merged.rows.insert(key, row);
                    counts.inserted += 1;
                }
            }
        }

        state.targets.insert(schema.table().to_string(), merged);
        Ok(counts)
    }

    async fn drop_staging_table(&mut self, staging_table: &str) -> Result<(), WarehouseError> {
        self.warehouse.lock().staging.remove(&(self.id, staging_table.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn schema() -> TableSchema {
        TableSchema::builder("raw_agents")
            .column("AGENT_ID", ColumnType::Varchar(Some(20)))
            .column("FIRST_NAME", ColumnType::Varchar(Some(50)))
            .merge_key("AGENT_ID")
            .build()
            .unwrap()
    }

    fn text(value: &str) -> SqlValue {
        SqlValue::Text(Some(value.to_string()))
    }

    fn ts() -> SqlValue {
        SqlValue::Timestamp(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0)))
    }

    #[tokio::test]
    async fn test_staging_requires_target() {
        let warehouse = MemoryWarehouse::new();
        let mut session = warehouse.session().await.unwrap();

        let result = session.create_staging_table(&schema()).await;
        assert!(matches!(result, Err(WarehouseError::MissingTable(_))));
    }

    #[tokio::test]
    async fn test_merge_inserts_then_updates() {
        let warehouse = MemoryWarehouse::new();
        let schema = schema();
        let columns = schema.all_columns();
        let mut session = warehouse.session().await.unwrap();
        session.ensure_target_table(&schema).await.unwrap();

        let staging = session.create_staging_table(&schema).await.unwrap();
        session
            .copy_into_staging(&staging, &columns, &[vec![text("AGT1"), text("Ann"), ts()]])
            .await
            .unwrap();
        let counts = session.merge_staging(&schema, &staging, &columns).await.unwrap();
        assert_eq!(counts, MergeCounts { inserted: 1, updated: 0 });
        session.drop_staging_table(&staging).await.unwrap();

        let staging = session.create_staging_table(&schema).await.unwrap();
        session
            .copy_into_staging(
                &staging,
                &columns,
                &[vec![text("AGT1"), text("Anne"), ts()], vec![text("AGT2"), text("Bo"), ts()]],
            )
            .await
            .unwrap();
        let counts = session.merge_staging(&schema, &staging, &columns).await.unwrap();
        assert_eq!(counts, MergeCounts { inserted: 1, updated: 1 });

        assert_eq!(warehouse.row_count("raw_agents"), 2);
        assert_eq!(warehouse.value("raw_agents", "AGT1", "FIRST_NAME"), Some(text("Anne")));
    }

    #[tokio::test]
    async fn test_duplicate_staging_keys_fail_the_whole_merge() {
        let warehouse = MemoryWarehouse::new();
        let schema = schema();
        let columns = schema.all_columns();
        let mut session = warehouse.session().await.unwrap();
        session.ensure_target_table(&schema).await.unwrap();
        let staging = session.create_staging_table(&schema).await.unwrap();
        session
            .copy_into_staging(
                &staging,
                &columns,
                &[vec![text("AGT1"), text("A"), ts()], vec![text("AGT1"), text("B"), ts()]],
            )
            .await
            .unwrap();

        assert!(session.merge_staging(&schema, &staging, &columns).await.is_err());
        assert_eq!(warehouse.row_count("raw_agents"), 0);
    }

    #[tokio::test]
    async fn test_staging_is_private_and_dropped_with_session() {
        let warehouse = MemoryWarehouse::new();
        let schema = schema();
        {
            let mut session = warehouse.session().await.unwrap();
            session.ensure_target_table(&schema).await.unwrap();
            let staging = session.create_staging_table(&schema).await.unwrap();

            let mut other = warehouse.session().await.unwrap();
            let result = other.copy_into_staging(&staging, &schema.all_columns(), &[]).await;
            assert!(matches!(result, Err(WarehouseError::MissingTable(_))));

            assert_eq!(warehouse.staging_tables(), vec!["raw_agents_staging".to_string()]);
        }
        assert!(warehouse.staging_tables().is_empty());
    }

    #[tokio::test]
    async fn test_not_null_load_ts_is_enforced() {
        let warehouse = MemoryWarehouse::new();
        let schema = schema();
        let mut session = warehouse.session().await.unwrap();
        session.ensure_target_table(&schema).await.unwrap();
        let staging = session.create_staging_table(&schema).await.unwrap();

        let result = session
            .copy_into_staging(&staging, schema.columns(), &[vec![text("AGT1"), text("A")]])
            .await;
        assert!(matches!(result, Err(WarehouseError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_copy_rejects_nul_bytes_and_injected_failures() {
        let warehouse = MemoryWarehouse::new();
        let schema = schema();
        let columns = schema.all_columns();
        let mut session = warehouse.session().await.unwrap();
        session.ensure_target_table(&schema).await.unwrap();
        let staging = session.create_staging_table(&schema).await.unwrap();

        let result = session
            .copy_into_staging(&staging, &columns, &[vec![text("AGT1"), text("A\0n"), ts()]])
            .await;
        assert!(matches!(result, Err(WarehouseError::Rejected(_))));

        warehouse.fail_next_copy("connection reset");
        let result =
            session.copy_into_staging(&staging, &columns, &[vec![text("AGT1"), text("Ann"), ts()]]).await;
        assert!(matches!(result, Err(WarehouseError::Rejected(message)) if message == "connection reset"));

        let copied =
            session.copy_into_staging(&staging, &columns, &[vec![text("AGT1"), text("Ann"), ts()]]).await;
        assert_eq!(copied.unwrap(), 1);
    }
}
