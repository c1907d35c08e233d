// public
pub mod batch;
pub mod chat;
pub mod extract;
pub mod generator;
pub mod loader;
pub mod manifest;
pub mod pipeline;
pub mod schema;
pub mod transform;

pub mod database;
pub use database::{
    memory::MemoryWarehouse,
    postgres::{client::PostgresClient, PostgresWarehouse},
    sql_type_wrapper::SqlValue,
    MergeCounts, Warehouse, WarehouseError, WarehouseSession,
};

mod simple_file_formatters;
pub use simple_file_formatters::csv::{AsyncCsvAppender, CsvAppendError};

mod helpers;
pub use helpers::format_duration;

mod logger;
pub use logger::{parse_log_level, setup_info_logger, setup_logger};

pub use chat::ChatClients;
pub use loader::{UpsertJob, UpsertLoader, UpsertResult};
pub use pipeline::{run_pipeline, PipelineReport};
// export 3rd party dependencies
pub use async_trait::async_trait;
pub use tokio::main as insurance_etl_main;
pub use tracing::level_filters::LevelFilter;
