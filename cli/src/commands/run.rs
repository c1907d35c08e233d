use std::{path::PathBuf, sync::Arc};

use insurance_etl::{
    format_duration,
    manifest::yaml::{read_manifest, YAML_CONFIG_NAME},
    parse_log_level, run_pipeline,
    schema::EntityKind,
    setup_logger, ChatClients, MemoryWarehouse, PipelineReport, PostgresWarehouse, Warehouse,
};

use crate::{
    console::{print_error_message, print_success_message, print_summary_line, print_warn_message},
    manifest_file::validate_manifest_exists,
};

fn print_report(report: &PipelineReport) {
    for entity in &report.entities {
        let upsert = &entity.upsert;
        print_success_message(&format!("{} -> {}", entity.entity, upsert.target_table));
        print_summary_line("extracted", &entity.extracted_rows.to_string());
        print_summary_line("staged", &upsert.rows_staged.to_string());
        print_summary_line("inserted", &upsert.rows_inserted.to_string());
        print_summary_line("updated", &upsert.rows_updated.to_string());
        print_summary_line("rejected", &upsert.rows_rejected().to_string());
        print_summary_line("took", &format_duration(entity.duration));
        if !entity.missing_columns.is_empty() {
            print_warn_message(&format!(
                "  missing source columns: {}",
                entity.missing_columns.join(", ")
            ));
        }
    }

    for failure in &report.failures {
        print_error_message(&format!("{} failed: {}", failure.entity, failure.error));
    }
}

pub async fn handle_run_command(
    project_path: PathBuf,
    entities: &[EntityKind],
    dry_run: bool,
    log_level: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let level = parse_log_level(log_level).ok_or_else(|| {
        let message = format!("Unknown log level {}", log_level);
        print_error_message(&message);
        message
    })?;
    setup_logger(level);

    validate_manifest_exists(&project_path)?;

    let manifest = read_manifest(&project_path.join(YAML_CONFIG_NAME)).map_err(|e| {
        print_error_message(&format!("Could not read {}: {}", YAML_CONFIG_NAME, e));
        e
    })?;

    let (warehouse, chat): (Arc<dyn Warehouse>, ChatClients) = if dry_run {
        print_warn_message("Dry run, loading into an in-memory warehouse and skipping notifications");
        (Arc::new(MemoryWarehouse::new()), ChatClients::default())
    } else {
        let warehouse = PostgresWarehouse::connect(&manifest.warehouse).await.map_err(|e| {
            print_error_message(&format!("Could not connect to the warehouse: {}", e));
            e
        })?;
        (Arc::new(warehouse), ChatClients::new(&manifest.notifications))
    };

    let report = run_pipeline(&manifest, &project_path, warehouse, &chat, entities)
        .await
        .map_err(|e| {
            print_error_message(&format!("Pipeline failed: {}", e));
            e
        })?;

    print_report(&report);

    if !report.is_success() {
        return Err(format!("{} entities failed", report.failures.len()).into());
    }

    print_success_message(&format!(
        "Pipeline finished in {} with {} rejected rows",
        format_duration(report.duration),
        report.rows_rejected()
    ));

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use insurance_etl::manifest::{core::Manifest, yaml::write_manifest};
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_dry_run_loads_claims() {
        let dir = tempdir().unwrap();
        let project = dir.path().to_path_buf();
        fs::create_dir_all(project.join("data")).unwrap();
        fs::write(
            project.join("data/claims.csv"),
            "CLAIM_ID,POLICY_ID,CLAIM_AMOUNT,CLAIM_DATE,STATUS\nCLM001,POL001,100.50,2023-01-05,open\n",
        )
        .unwrap();

        let mut manifest = Manifest::starter("dry");
        manifest.warehouse.connection_string = None;
        manifest.entities.retain(|e| e.entity == EntityKind::Claims);
        write_manifest(&manifest, &project.join(YAML_CONFIG_NAME)).unwrap();

        handle_run_command(project.clone(), &[], true, "warn").await.unwrap();

        assert!(handle_run_command(project, &[], true, "loud").await.is_err());
    }
}
