use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    manifest::{
        notifications::NotificationsConfig,
        pipeline::{EntityConfig, PipelineConfig},
        warehouse::WarehouseConfig,
    },
    schema::EntityKind,
};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_path: Option<String>,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    pub entities: Vec<EntityConfig>,
}

impl Manifest {
    /// A starter manifest pointing every entity at `data/<entity>.csv`.
    pub fn starter(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            environment_path: Some("./.env".to_string()),
            warehouse: WarehouseConfig {
                connection_string: Some("${DATABASE_URL}".to_string()),
                ..Default::default()
            },
            notifications: NotificationsConfig::default(),
            pipeline: PipelineConfig::default(),
            entities: EntityKind::ALL
                .iter()
                .map(|kind| EntityConfig {
                    entity: *kind,
                    source: PathBuf::from(format!("data/{}.csv", kind.as_str())),
                    target_table: None,
                })
                .collect(),
        }
    }

    pub fn entity(&self, kind: EntityKind) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.entity == kind)
    }

    /// Source path resolved against the directory holding the manifest.
    pub fn source_path(&self, project_path: &Path, entity: &EntityConfig) -> PathBuf {
        if entity.source.is_absolute() {
            entity.source.clone()
        } else {
            project_path.join(&entity.source)
        }
    }

    pub fn rejects_path(&self, project_path: &Path) -> PathBuf {
        if self.pipeline.rejects_path.is_absolute() {
            self.pipeline.rejects_path.clone()
        } else {
            project_path.join(&self.pipeline.rejects_path)
        }
    }
}
