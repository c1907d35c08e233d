use std::env;

use dotenv::dotenv;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCHEMA: &str = "public";

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn is_default_schema(schema: &String) -> bool {
    schema == DEFAULT_SCHEMA
}

#[derive(thiserror::Error, Debug)]
pub enum WarehouseConfigError {
    #[error("No warehouse connection configured, set `warehouse.connection_string`, `warehouse.host` or DATABASE_URL: {0}")]
    NoConnectionConfigured(#[from] env::VarError),
}

/// Where the target tables live. Either a full connection string or the discrete fields, when
/// neither is set `DATABASE_URL` from the environment is used.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default = "default_schema", skip_serializing_if = "is_default_schema")]
    pub schema: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            schema: default_schema(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl WarehouseConfig {
    /// Resolves the connection string the client should parse.
    pub fn connection_string(&self) -> Result<String, WarehouseConfigError> {
        if let Some(connection_string) = &self.connection_string {
            return Ok(connection_string.clone());
        }

        if let Some(host) = &self.host {
            let mut parts = vec![format!("host={}", host)];
            if let Some(port) = self.port {
                parts.push(format!("port={}", port));
            }
            if let Some(user) = &self.user {
                parts.push(format!("user={}", user));
            }
            if let Some(password) = &self.password {
                parts.push(format!("password='{}'", password.replace('\'', "\\'")));
            }
            if let Some(database) = &self.database {
                parts.push(format!("dbname={}", database));
            }
            return Ok(parts.join(" "));
        }

        dotenv().ok();
        Ok(env::var("DATABASE_URL")?)
    }

    pub fn uses_default_schema(&self) -> bool {
        is_default_schema(&self.schema)
    }
}
