use std::path::PathBuf;

use insurance_etl::{
    generator::{generate_rows, GenerateOptions},
    manifest::yaml::{read_manifest_without_sources, YAML_CONFIG_NAME},
    pipeline::select_entities,
    schema::EntityKind,
    setup_info_logger,
};

use crate::{
    console::{print_error_message, print_success_message},
    manifest_file::validate_manifest_exists,
};

pub async fn handle_generate_command(
    project_path: PathBuf,
    entity: Option<EntityKind>,
    options: GenerateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    setup_info_logger();

    validate_manifest_exists(&project_path)?;

    let manifest =
        read_manifest_without_sources(&project_path.join(YAML_CONFIG_NAME)).map_err(|e| {
            print_error_message(&format!("Could not read {}: {}", YAML_CONFIG_NAME, e));
            e
        })?;

    let targets = select_entities(&manifest, entity.as_slice());
    if targets.is_empty() {
        let requested = entity.map(|e| e.to_string()).unwrap_or_default();
        let message = format!("Entity {} is not configured in the manifest", requested);
        print_error_message(&message);
        return Err(message.into());
    }

    for config in targets {
        let path = manifest.source_path(&project_path, config);
        let generated = generate_rows(config.entity, &path, options).await.map_err(|e| {
            print_error_message(&format!("Could not generate {}: {}", config.entity, e));
            e
        })?;

        print_success_message(&format!(
            "{} - appended {} rows ({} duplicates, ids {} to {}) to {}",
            generated.entity,
            generated.rows_written,
            generated.duplicates,
            generated.first_id,
            generated.last_id,
            generated.path.display()
        ));
    }

    Ok(())
}
