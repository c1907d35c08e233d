pub mod client;
pub mod generate;
mod warehouse;

pub use warehouse::PostgresWarehouse;
