use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::error::SqlState;
use tracing::debug;

use crate::{
    database::{
        postgres::{
            client::{
                bulk_insert_via_copy, PooledPostgresConnection, PostgresClient,
                PostgresConnectionError, PostgresError,
            },
            generate::{
                create_staging_table_sql, create_target_table_sql, drop_staging_table_sql,
                format_staging_table_name, merge_staging_sql,
            },
        },
        sql_type_wrapper::SqlValue,
        staging_table_name, MergeCounts, Warehouse, WarehouseError, WarehouseSession,
    },
    manifest::warehouse::WarehouseConfig,
    schema::{ColumnDefinition, TableSchema},
};

impl From<PostgresError> for WarehouseError {
    fn from(value: PostgresError) -> Self {
        match value {
            PostgresError::PgError(e) => WarehouseError::PgError(e),
            PostgresError::ConnectionPoolError(e) => WarehouseError::Connection(e.to_string()),
        }
    }
}

fn map_pg_error(table: &str, error: tokio_postgres::Error) -> WarehouseError {
    if error.code() == Some(&SqlState::UNDEFINED_TABLE) {
        WarehouseError::MissingTable(table.to_string())
    } else {
        WarehouseError::PgError(error)
    }
}

/// Postgres backed warehouse, tables are created in `schema`.
pub struct PostgresWarehouse {
    client: Arc<PostgresClient>,
    schema: String,
}

impl PostgresWarehouse {
    pub fn new(client: Arc<PostgresClient>, schema: &str) -> Self {
        Self { client, schema: schema.to_string() }
    }

    pub async fn connect(config: &WarehouseConfig) -> Result<Self, PostgresConnectionError> {
        let client = PostgresClient::new(config).await?;
        Ok(Self::new(Arc::new(client), &config.schema))
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn session(&self) -> Result<Box<dyn WarehouseSession>, WarehouseError> {
        let conn = self.client.connection().await?;
        Ok(Box::new(PostgresSession { conn, schema: self.schema.clone() }))
    }
}

struct PostgresSession {
    conn: PooledPostgresConnection,
    schema: String,
}

#[async_trait]
impl WarehouseSession for PostgresSession {
    async fn ensure_target_table(&mut self, schema: &TableSchema) -> Result<(), WarehouseError> {
        let sql = create_target_table_sql(&self.schema, schema);
        debug!("Ensuring target table: {}", sql);
        self.conn.batch_execute(&sql).await?;
        Ok(())
    }

    async fn create_staging_table(&mut self, schema: &TableSchema) -> Result<String, WarehouseError> {
        let staging_table = staging_table_name(schema);
        let sql = create_staging_table_sql(&self.schema, schema, &staging_table);
        debug!("Creating staging table: {}", sql);
        self.conn.batch_execute(&sql).await.map_err(|e| map_pg_error(schema.table(), e))?;
        Ok(staging_table)
    }

    async fn copy_into_staging(
        &mut self,
        staging_table: &str,
        columns: &[ColumnDefinition],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, WarehouseError> {
        bulk_insert_via_copy(&self.conn, &format_staging_table_name(staging_table), columns, rows)
            .await
            .map_err(|e| map_pg_error(staging_table, e))
    }

    async fn merge_staging(
        &mut self,
        schema: &TableSchema,
        staging_table: &str,
        columns: &[ColumnDefinition],
    ) -> Result<MergeCounts, WarehouseError> {
        let sql = merge_staging_sql(&self.schema, schema, staging_table, columns);
        debug!("Merging staging into target: {}", sql);

        // dropping the transaction without commit rolls the whole merge back
        let transaction = self.conn.transaction().await?;
        let row = transaction.query_one(&sql, &[]).await.map_err(|e| map_pg_error(schema.table(), e))?;
        let inserted: i64 = row.try_get("inserted")?;
        let updated: i64 = row.try_get("updated")?;
        transaction.commit().await?;

        Ok(MergeCounts { inserted: inserted.max(0) as u64, updated: updated.max(0) as u64 })
    }

    async fn drop_staging_table(&mut self, staging_table: &str) -> Result<(), WarehouseError> {
        self.conn.batch_execute(&drop_staging_table_sql(staging_table)).await?;
        Ok(())
    }
}
