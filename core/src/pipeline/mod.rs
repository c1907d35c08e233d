//! Runs extract, transform and load for each configured entity in order.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::task::{self, JoinError};
use tracing::{error, info, warn};

use crate::{
    chat::{pipeline_failed_message, ChatClients, PIPELINE_STARTED_MESSAGE, PIPELINE_SUCCEEDED_MESSAGE},
    database::Warehouse,
    extract::{extract_from_csv, ExtractError},
    helpers::format_duration,
    loader::{LoaderOptions, UpsertError, UpsertJob, UpsertLoader, UpsertResult},
    manifest::{core::Manifest, pipeline::EntityConfig},
    schema::EntityKind,
    transform::{transform_extracted, TransformDiagnostics},
};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("{0} - extract failed: {1}")]
    Extract(EntityKind, ExtractError),

    #[error("{0} - extract task failed: {1}")]
    ExtractTaskFailed(EntityKind, JoinError),

    #[error("{0} - load failed: {1}")]
    Upsert(EntityKind, UpsertError),

    #[error("{table} - {rejected} rows were rejected during ingest")]
    IngestPartialFailure { table: String, rejected: usize },

    #[error("None of the requested entities are configured in the manifest")]
    NoEntitiesSelected,
}

#[derive(Debug, Clone)]
pub struct EntityReport {
    pub entity: EntityKind,
    pub source: PathBuf,
    pub extracted_rows: usize,
    pub missing_columns: Vec<String>,
    pub transform: TransformDiagnostics,
    pub upsert: UpsertResult,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct EntityFailure {
    pub entity: EntityKind,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub entities: Vec<EntityReport>,
    /// Only populated when `continue_on_entity_failure` is set, otherwise the first failure halts.
    pub failures: Vec<EntityFailure>,
    pub duration: Duration,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn rows_rejected(&self) -> usize {
        self.entities.iter().map(|e| e.upsert.rows_rejected()).sum()
    }
}

/// The entities to run, in manifest order, narrowed to `only` when it is not empty.
pub fn select_entities<'a>(manifest: &'a Manifest, only: &[EntityKind]) -> Vec<&'a EntityConfig> {
    manifest.entities.iter().filter(|e| only.is_empty() || only.contains(&e.entity)).collect()
}

async fn run_entity(
    manifest: &Manifest,
    project_path: &Path,
    loader: &UpsertLoader,
    entity: &EntityConfig,
) -> Result<EntityReport, PipelineError> {
    let start = Instant::now();
    let kind = entity.entity;
    let definition = kind.definition();
    let source = manifest.source_path(project_path, entity);

    info!("{} - extracting {}", kind, source.display());
    let extracted = {
        let definition = definition.clone();
        let source = source.clone();
        task::spawn_blocking(move || extract_from_csv(&source, &definition))
            .await
            .map_err(|e| PipelineError::ExtractTaskFailed(kind, e))?
            .map_err(|e| PipelineError::Extract(kind, e))?
    };
    let extracted_rows = extracted.batch.len();
    let missing_columns = extracted.missing_columns.clone();

    let transformed = transform_extracted(&definition, extracted);
    info!(
        "{} - transformed {} rows into {}",
        kind, transformed.diagnostics.rows_in, transformed.diagnostics.rows_out
    );

    let schema = definition.schema.with_table(&entity.target_table());
    let upsert = loader
        .upsert(UpsertJob::new(schema, transformed.batch))
        .await
        .map_err(|e| PipelineError::Upsert(kind, e))?;

    if upsert.is_partial() && manifest.pipeline.fail_on_rejected_rows {
        return Err(PipelineError::IngestPartialFailure {
            table: upsert.target_table.clone(),
            rejected: upsert.rows_rejected(),
        });
    }

    Ok(EntityReport {
        entity: kind,
        source,
        extracted_rows,
        missing_columns,
        transform: transformed.diagnostics,
        upsert,
        duration: start.elapsed(),
    })
}

/// Runs every selected entity through extract, transform and load.
///
/// A failing entity is logged and reported to the chat sinks. By default the run stops there and
/// the error is returned, with `continue_on_entity_failure` the failure is recorded on the report
/// and the next entity runs.
pub async fn run_pipeline(
    manifest: &Manifest,
    project_path: &Path,
    warehouse: Arc<dyn Warehouse>,
    chat: &ChatClients,
    only: &[EntityKind],
) -> Result<PipelineReport, PipelineError> {
    let start = Instant::now();

    let entities = select_entities(manifest, only);
    if entities.is_empty() {
        return Err(PipelineError::NoEntitiesSelected);
    }

    info!("Starting ETL pipeline {} against {} warehouse...", manifest.name, warehouse.name());
    chat.notify(PIPELINE_STARTED_MESSAGE).await;

    let loader = UpsertLoader::with_options(
        warehouse,
        LoaderOptions {
            rejects_path: Some(manifest.rejects_path(project_path)),
            ..Default::default()
        },
    );

    let mut report = PipelineReport::default();
    for entity in entities {
        match run_entity(manifest, project_path, &loader, entity).await {
            Ok(entity_report) => {
                info!(
                    "{} - done: {} inserted, {} updated, {} rejected - took {}",
                    entity_report.entity,
                    entity_report.upsert.rows_inserted,
                    entity_report.upsert.rows_updated,
                    entity_report.upsert.rows_rejected(),
                    format_duration(entity_report.duration)
                );
                report.entities.push(entity_report);
            }
            Err(e) => {
                error!("An error occurred: {}", e);
                chat.notify(&pipeline_failed_message(&e.to_string())).await;

                if !manifest.pipeline.continue_on_entity_failure {
                    return Err(e);
                }
                warn!("{} - continuing with the remaining entities", entity.entity);
                report.failures.push(EntityFailure { entity: entity.entity, error: e.to_string() });
            }
        }
    }

    report.duration = start.elapsed();
    if report.is_success() {
        info!("ETL pipeline completed - took {}", format_duration(report.duration));
        chat.notify(PIPELINE_SUCCEEDED_MESSAGE).await;
    } else {
        warn!(
            "ETL pipeline completed with {} failed entities - took {}",
            report.failures.len(),
            format_duration(report.duration)
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use mockito::Matcher;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        database::memory::MemoryWarehouse,
        manifest::{
            notifications::{NotificationsConfig, SlackConfig},
            pipeline::PipelineConfig,
            warehouse::WarehouseConfig,
        },
    };

    const CLAIMS_CSV: &str = "claim_id,policy_id,customer_id,claim_amount,claim_date,incident_date,claim_type,status,adjuster_notes
CLM001,POL001,CUST001,100.0,2023-01-05,2023-01-01,Auto,Open,
CLM002,POL002,CUST002,250.50,2023-02-10,not a date,Home,Closed,Settled
CLM001,POL001,CUST001,999.0,2023-01-05,2023-01-01,Auto,Open,duplicate
";

    const AGENTS_CSV: &str = "AgentID,First_Name,Last_Name,Email,Phone,Agency_Name
AGT001,ann,lee,ANN@EXAMPLE.COM,(555) 111-2222,acme
";

    fn project(files: &[(&str, &str)]) -> (TempDir, Manifest) {
        let dir = tempfile::tempdir().unwrap();
        let mut entities = Vec::new();
        for (entity, contents) in files {
            let path = dir.path().join(format!("{}.csv", entity));
            fs::write(&path, contents).unwrap();
            entities.push(EntityConfig {
                entity: entity.parse().unwrap(),
                source: PathBuf::from(format!("{}.csv", entity)),
                target_table: None,
            });
        }

        let manifest = Manifest {
            name: "test".to_string(),
            description: None,
            environment_path: None,
            warehouse: WarehouseConfig::default(),
            notifications: NotificationsConfig::default(),
            pipeline: PipelineConfig::default(),
            entities,
        };
        (dir, manifest)
    }

    #[tokio::test]
    async fn test_pipeline_loads_every_entity() {
        let (dir, manifest) = project(&[("claims", CLAIMS_CSV), ("agents", AGENTS_CSV)]);
        let warehouse = Arc::new(MemoryWarehouse::new());

        let report =
            run_pipeline(&manifest, dir.path(), warehouse.clone(), &ChatClients::default(), &[])
                .await
                .unwrap();

        assert!(report.is_success());
        assert_eq!(report.entities.len(), 2);

        let claims = &report.entities[0];
        assert_eq!(claims.extracted_rows, 3);
        assert_eq!(claims.transform.duplicates_removed, 1);
        assert_eq!(claims.transform.unknown_date_count(), 1);
        assert_eq!(claims.upsert.rows_inserted, 2);

        assert_eq!(warehouse.row_count("raw_claims"), 2);
        assert_eq!(
            warehouse.value("raw_agents", "AGT001", "EMAIL"),
            Some(crate::database::sql_type_wrapper::SqlValue::Text(Some("ann@example.com".to_string())))
        );
    }

    #[tokio::test]
    async fn test_entity_selection_and_target_override() {
        let (dir, mut manifest) = project(&[("claims", CLAIMS_CSV), ("agents", AGENTS_CSV)]);
        manifest.entities[1].target_table = Some("agents_v2".to_string());
        let warehouse = Arc::new(MemoryWarehouse::new());

        let report = run_pipeline(
            &manifest,
            dir.path(),
            warehouse.clone(),
            &ChatClients::default(),
            &[EntityKind::Agents],
        )
        .await
        .unwrap();

        assert_eq!(report.entities.len(), 1);
        assert!(warehouse.has_table("agents_v2"));
        assert!(!warehouse.has_table("raw_claims"));

        let none = run_pipeline(
            &manifest,
            dir.path(),
            warehouse,
            &ChatClients::default(),
            &[EntityKind::Payments],
        )
        .await;
        assert!(matches!(none, Err(PipelineError::NoEntitiesSelected)));
    }

    #[tokio::test]
    async fn test_first_failure_halts_by_default() {
        let (dir, mut manifest) = project(&[("claims", CLAIMS_CSV), ("agents", AGENTS_CSV)]);
        manifest.entities[0].source = PathBuf::from("missing.csv");
        let warehouse = Arc::new(MemoryWarehouse::new());

        let result =
            run_pipeline(&manifest, dir.path(), warehouse.clone(), &ChatClients::default(), &[]).await;

        assert!(matches!(result, Err(PipelineError::Extract(EntityKind::Claims, _))));
        assert!(!warehouse.has_table("raw_agents"));
    }

    #[tokio::test]
    async fn test_continue_on_entity_failure_runs_the_rest() {
        let (dir, mut manifest) = project(&[("claims", CLAIMS_CSV), ("agents", AGENTS_CSV)]);
        manifest.entities[0].source = PathBuf::from("missing.csv");
        manifest.pipeline.continue_on_entity_failure = true;
        let warehouse = Arc::new(MemoryWarehouse::new());

        let report =
            run_pipeline(&manifest, dir.path(), warehouse.clone(), &ChatClients::default(), &[])
                .await
                .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failures[0].entity, EntityKind::Claims);
        assert_eq!(report.entities.len(), 1);
        assert_eq!(warehouse.row_count("raw_agents"), 1);
    }

    #[tokio::test]
    async fn test_rejected_rows_fail_when_configured() {
        let csv = "PAYMENT_ID,POLICY_ID,PAYMENT_AMOUNT\nPAY1,POL1,10\nPAY2,POL1,lots\n";
        let (dir, mut manifest) = project(&[("payments", csv)]);
        manifest.pipeline.fail_on_rejected_rows = true;

        let result = run_pipeline(
            &manifest,
            dir.path(),
            Arc::new(MemoryWarehouse::new()),
            &ChatClients::default(),
            &[],
        )
        .await;

        match result {
            Err(PipelineError::IngestPartialFailure { table, rejected }) => {
                assert_eq!(table, "raw_payments");
                assert_eq!(rejected, 1);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(dir.path().join("rejects").join("raw_payments_rejects.csv").exists());
    }

    #[tokio::test]
    async fn test_start_and_success_are_notified() {
        let mut server = mockito::Server::new_async().await;
        let started = server
            .mock("POST", "/hook")
            .match_body(Matcher::Json(json!({ "text": PIPELINE_STARTED_MESSAGE })))
            .with_status(200)
            .create_async()
            .await;
        let succeeded = server
            .mock("POST", "/hook")
            .match_body(Matcher::Json(json!({ "text": PIPELINE_SUCCEEDED_MESSAGE })))
            .with_status(200)
            .create_async()
            .await;

        let (dir, manifest) = project(&[("agents", AGENTS_CSV)]);
        let chat = ChatClients::new(&NotificationsConfig {
            slack: Some(SlackConfig { webhook_url: format!("{}/hook", server.url()) }),
        });

        run_pipeline(&manifest, dir.path(), Arc::new(MemoryWarehouse::new()), &chat, &[])
            .await
            .unwrap();

        started.assert_async().await;
        succeeded.assert_async().await;
    }

    #[tokio::test]
    async fn test_failure_is_notified() {
        let mut server = mockito::Server::new_async().await;
        let failed = server
            .mock("POST", "/hook")
            .match_body(Matcher::Regex("ETL pipeline failed".to_string()))
            .with_status(200)
            .create_async()
            .await;
        let _other = server.mock("POST", "/hook").with_status(200).create_async().await;

        let (dir, mut manifest) = project(&[("agents", AGENTS_CSV)]);
        manifest.entities[0].source = PathBuf::from("missing.csv");
        let chat = ChatClients::new(&NotificationsConfig {
            slack: Some(SlackConfig { webhook_url: format!("{}/hook", server.url()) }),
        });

        let result =
            run_pipeline(&manifest, dir.path(), Arc::new(MemoryWarehouse::new()), &chat, &[]).await;

        assert!(result.is_err());
        failed.assert_async().await;
    }
}
