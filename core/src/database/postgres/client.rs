use std::time::Duration;

use bb8::{Pool, PooledConnection, RunError};
use bb8_postgres::PostgresConnectionManager;
use futures::pin_mut;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::{task, time::timeout};
use tokio_postgres::types::{ToSql, Type as PgType};
use tokio_postgres::{
    binary_copy::BinaryCopyInWriter, config::SslMode, Client, Config, Error as PgError,
};
use tracing::{debug, error};

use crate::{
    database::{
        postgres::generate::copy_into_sql,
        sql_type_wrapper::{column_type_to_pg_type, SqlValue},
    },
    manifest::warehouse::{WarehouseConfig, WarehouseConfigError},
    schema::ColumnDefinition,
};

pub type PostgresConnectionManagerTls = PostgresConnectionManager<MakeTlsConnector>;

/// A pooled connection detached from the pool borrow, so a session can own it.
pub type PooledPostgresConnection = PooledConnection<'static, PostgresConnectionManagerTls>;

#[derive(thiserror::Error, Debug)]
pub enum PostgresConnectionError {
    #[error("The database connection string is wrong please check your manifest or environment: {0}")]
    DatabaseConnectionConfigWrong(#[from] WarehouseConfigError),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(#[from] tokio_postgres::Error),

    #[error("Can not connect to the database please make sure your connection string is correct")]
    CanNotConnectToDatabase,

    #[error("Could not parse connection string make sure it is correctly formatted")]
    CouldNotParseConnectionString,

    #[error("Could not create tls connector")]
    CouldNotCreateTlsConnector,
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresError {
    #[error("PgError {0}")]
    PgError(#[from] PgError),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(#[from] RunError<tokio_postgres::Error>),
}

pub struct PostgresClient {
    pool: Pool<PostgresConnectionManagerTls>,
}

impl PostgresClient {
    pub async fn new(warehouse: &WarehouseConfig) -> Result<Self, PostgresConnectionError> {
        async fn _new(
            warehouse: &WarehouseConfig,
            disable_ssl: bool,
        ) -> Result<PostgresClient, PostgresConnectionError> {
            let connection_str = warehouse.connection_string()?;
            let connect_timeout = Duration::from_millis(warehouse.connect_timeout_ms);

            let mut config: Config = connection_str
                .parse()
                .map_err(|_| PostgresConnectionError::CouldNotParseConnectionString)?;
            config.connect_timeout(connect_timeout);

            if disable_ssl {
                config.ssl_mode(SslMode::Disable);
            }

            let connector = TlsConnector::builder()
                .build()
                .map_err(|_| PostgresConnectionError::CouldNotCreateTlsConnector)?;
            let tls_connector = MakeTlsConnector::new(connector);

            let (client, connection) =
                match timeout(connect_timeout, config.connect(tls_connector.clone())).await {
                    Ok(Ok((client, connection))) => (client, connection),
                    Ok(Err(e)) => {
                        // retry without ssl if ssl has been attempted and failed
                        if !disable_ssl &&
                            config.get_ssl_mode() != SslMode::Disable &&
                            !connection_str.contains("sslmode=require")
                        {
                            return Box::pin(_new(warehouse, true)).await;
                        }
                        error!("Error connecting to database: {}", e);
                        return Err(PostgresConnectionError::CanNotConnectToDatabase);
                    }
                    Err(e) => {
                        error!("Timeout connecting to database: {}", e);
                        return Err(PostgresConnectionError::CanNotConnectToDatabase);
                    }
                };

            let connection_handle = task::spawn(connection);

            if client.query_one("SELECT 1", &[]).await.is_err() {
                return Err(PostgresConnectionError::CanNotConnectToDatabase);
            }

            drop(client);
            match connection_handle.await {
                Ok(Ok(())) => (),
                Ok(Err(_)) | Err(_) => return Err(PostgresConnectionError::CanNotConnectToDatabase),
            }

            let manager = PostgresConnectionManager::new(config, tls_connector);
            let pool = Pool::builder().connection_timeout(connect_timeout).build(manager).await?;

            Ok(PostgresClient { pool })
        }

        _new(warehouse, false).await
    }

    /// Checks a connection out for as long as the caller needs it, session scoped state such as
    /// temporary tables stays visible until it is returned.
    pub async fn connection(&self) -> Result<PooledPostgresConnection, PostgresError> {
        let conn = self.pool.get_owned().await?;
        Ok(conn)
    }
}

/// Streams typed rows into `table_name` with a binary `COPY`, returning the rows written.
pub async fn bulk_insert_via_copy(
    client: &Client,
    table_name: &str,
    columns: &[ColumnDefinition],
    data: &[Vec<SqlValue>],
) -> Result<u64, PgError> {
    let column_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let column_types: Vec<PgType> =
        columns.iter().map(|c| column_type_to_pg_type(&c.column_type)).collect();

    let stmt = copy_into_sql(table_name, &column_names);
    debug!("Bulk insert statement: {}", stmt);

    let sink = client.copy_in(&stmt).await?;
    let writer = BinaryCopyInWriter::new(sink, &column_types);
    pin_mut!(writer);

    for row in data {
        let params: Vec<&(dyn ToSql + Sync)> =
            row.iter().map(|param| param as &(dyn ToSql + Sync)).collect();
        writer.as_mut().write(&params).await?;
    }

    writer.finish().await
}
