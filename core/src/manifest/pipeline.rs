use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::schema::EntityKind;

fn default_rejects_path() -> PathBuf {
    PathBuf::from("rejects")
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Keep going with the remaining entities after one fails instead of halting.
    #[serde(default)]
    pub continue_on_entity_failure: bool,

    /// Treat rows rejected during ingest as a pipeline failure.
    #[serde(default)]
    pub fail_on_rejected_rows: bool,

    /// Directory for the per table `<table>_rejects.csv` files, relative to the manifest.
    #[serde(default = "default_rejects_path")]
    pub rejects_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            continue_on_entity_failure: false,
            fail_on_rejected_rows: false,
            rejects_path: default_rejects_path(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EntityConfig {
    pub entity: EntityKind,

    pub source: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,
}

impl EntityConfig {
    pub fn target_table(&self) -> String {
        self.target_table.clone().unwrap_or_else(|| self.entity.definition().default_table().to_string())
    }
}
