use std::{
    collections::HashSet,
    env,
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use regex::{Captures, Regex};
use tracing::{debug, error};

use crate::manifest::core::Manifest;

pub const YAML_CONFIG_NAME: &str = "insurance_etl.yaml";

/// Replaces every `${VAR}` with its environment value, collecting the names that are not set.
fn substitute_env_variables(contents: &str) -> Result<String, ReadManifestError> {
    let re = Regex::new(r"\$\{([^}]+)\}")?;
    let mut missing: Vec<String> = Vec::new();

    let result = re.replace_all(contents, |caps: &Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(val) => val,
            Err(_) => {
                error!("Environment variable {} not found", var_name);
                missing.push(var_name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ReadManifestError::EnvironmentVariablesNotFound(missing.join(", ")));
    }

    Ok(result.into_owned())
}

#[derive(thiserror::Error, Debug)]
pub enum ValidateManifestError {
    #[error("The manifest must list at least one entity")]
    NoEntities,

    #[error("Entity {0} is listed more than once")]
    EntityMustBeUnique(String),

    #[error("Target table {0} is used by more than one entity")]
    TargetTableMustBeUnique(String),

    #[error("Source file {1} for entity {0} does not exist")]
    SourceFileNotFound(String, String),
}

fn validate_sources(project_path: &Path, manifest: &Manifest) -> Result<(), ValidateManifestError> {
    for entity in &manifest.entities {
        let source = manifest.source_path(project_path, entity);
        if !source.exists() {
            return Err(ValidateManifestError::SourceFileNotFound(
                entity.entity.to_string(),
                source.display().to_string(),
            ));
        }
    }

    Ok(())
}

/// Checks that only depend on the manifest itself, not the files it points at.
pub fn validate_manifest_shape(manifest: &Manifest) -> Result<(), ValidateManifestError> {
    if manifest.entities.is_empty() {
        return Err(ValidateManifestError::NoEntities);
    }

    let mut seen_entities = HashSet::new();
    let mut seen_tables = HashSet::new();
    for entity in &manifest.entities {
        if !seen_entities.insert(entity.entity) {
            return Err(ValidateManifestError::EntityMustBeUnique(entity.entity.to_string()));
        }

        let table = entity.target_table();
        if !seen_tables.insert(table.clone()) {
            return Err(ValidateManifestError::TargetTableMustBeUnique(table));
        }
    }

    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum ReadManifestError {
    #[error("Could not open file: {0}")]
    CouldNotOpenFile(#[from] std::io::Error),

    #[error("Could not parse manifest: {0}")]
    CouldNotParseManifest(#[from] serde_yaml::Error),

    #[error("Could not build the environment substitution regex: {0}")]
    CouldNotSubstituteEnvVariables(#[from] regex::Error),

    #[error("Environment variables not found: {0}")]
    EnvironmentVariablesNotFound(String),

    #[error("Could not load environment file {0}: {1}")]
    CouldNotLoadEnvironmentFile(String, dotenv::Error),

    #[error("Could not validate manifest: {0}")]
    CouldNotValidateManifest(#[from] ValidateManifestError),

    #[error("No project path found using parent of manifest path")]
    NoProjectPathFoundUsingParentOfManifestPath,
}

fn extract_environment_path(contents: &str, file_path: &Path) -> Option<PathBuf> {
    let re = Regex::new(r"(?m)^environment_path:\s*(.+)$").ok()?;
    re.captures(contents).and_then(|cap| cap.get(1)).map(|m| {
        let path_str = m.as_str().trim().replace('\"', "");
        let base_dir = file_path.parent().unwrap_or(Path::new(""));
        let full_path = base_dir.join(path_str);
        full_path.canonicalize().unwrap_or(full_path)
    })
}

/// Reads the manifest and checks its shape without requiring the source files to exist, which is
/// what the generator needs before the first extract has been written.
pub fn read_manifest_without_sources(file_path: &PathBuf) -> Result<Manifest, ReadManifestError> {
    let mut file = File::open(file_path)?;
    let mut contents = String::new();

    file.read_to_string(&mut contents)?;

    if let Some(path) = extract_environment_path(&contents, file_path) {
        // a missing .env is fine, the variables may already be exported
        if path.exists() {
            dotenv::from_path(&path).map_err(|e| {
                ReadManifestError::CouldNotLoadEnvironmentFile(path.display().to_string(), e)
            })?;
            debug!("Loaded environment from {}", path.display());
        }
    }

    contents = substitute_env_variables(&contents)?;

    let manifest: Manifest = serde_yaml::from_str(&contents)?;
    validate_manifest_shape(&manifest)?;

    Ok(manifest)
}

pub fn read_manifest(file_path: &PathBuf) -> Result<Manifest, ReadManifestError> {
    let manifest = read_manifest_without_sources(file_path)?;

    let project_path =
        file_path.parent().ok_or(ReadManifestError::NoProjectPathFoundUsingParentOfManifestPath)?;
    validate_sources(project_path, &manifest)?;

    Ok(manifest)
}

#[derive(thiserror::Error, Debug)]
pub enum WriteManifestError {
    #[error("Could not parse manifest to string: {0}")]
    CouldNotTurnManifestToString(serde_yaml::Error),

    #[error("Could not create file: {0}")]
    CouldNotCreateFile(std::io::Error),

    #[error("Could not write to file: {0}")]
    CouldNotWriteToFile(std::io::Error),
}

pub fn write_manifest(data: &Manifest, file_path: &PathBuf) -> Result<(), WriteManifestError> {
    let yaml_string =
        serde_yaml::to_string(data).map_err(WriteManifestError::CouldNotTurnManifestToString)?;

    let mut file = File::create(file_path).map_err(WriteManifestError::CouldNotCreateFile)?;
    file.write_all(yaml_string.as_bytes()).map_err(WriteManifestError::CouldNotWriteToFile)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::schema::EntityKind;

    const MANIFEST: &str = r#"
name: insurance
warehouse:
  connection_string: ${INSURANCE_ETL_TEST_URL}
  schema: staging_area
notifications:
  slack:
    webhook_url: https://hooks.slack.test/abc
pipeline:
  fail_on_rejected_rows: true
entities:
  - entity: claims
    source: data/claims.csv
  - entity: Policy
    source: data/policies.csv
    target_table: policies_v2
"#;

    fn write_project(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/claims.csv"), "CLAIM_ID\n").unwrap();
        fs::write(dir.path().join("data/policies.csv"), "POLICY_ID\n").unwrap();
        let manifest_path = dir.path().join(YAML_CONFIG_NAME);
        fs::write(&manifest_path, contents).unwrap();
        (dir, manifest_path)
    }

    #[test]
    fn test_read_manifest_substitutes_and_defaults() {
        env::set_var("INSURANCE_ETL_TEST_URL", "postgresql://etl@localhost/insurance");
        let (_dir, path) = write_project(MANIFEST);

        let manifest = read_manifest(&path).unwrap();

        assert_eq!(
            manifest.warehouse.connection_string.as_deref(),
            Some("postgresql://etl@localhost/insurance")
        );
        assert_eq!(manifest.warehouse.schema, "staging_area");
        assert_eq!(manifest.warehouse.connect_timeout_ms, 5000);
        assert!(manifest.pipeline.fail_on_rejected_rows);
        assert!(!manifest.pipeline.continue_on_entity_failure);
        assert_eq!(manifest.entities[0].entity, EntityKind::Claims);
        assert_eq!(manifest.entities[0].target_table(), "raw_claims");
        assert_eq!(manifest.entities[1].entity, EntityKind::Policies);
        assert_eq!(manifest.entities[1].target_table(), "policies_v2");
        assert_eq!(
            manifest.notifications.slack.map(|s| s.webhook_url),
            Some("https://hooks.slack.test/abc".to_string())
        );
    }

    #[test]
    fn test_missing_env_variable_is_an_error() {
        let (_dir, path) = write_project(
            "name: x\nwarehouse:\n  connection_string: ${INSURANCE_ETL_DEFINITELY_UNSET}\nentities:\n  - entity: claims\n    source: data/claims.csv\n",
        );

        match read_manifest(&path) {
            Err(ReadManifestError::EnvironmentVariablesNotFound(names)) => {
                assert_eq!(names, "INSURANCE_ETL_DEFINITELY_UNSET")
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_environment_file_is_loaded() {
        let (dir, path) = write_project(
            "name: x\nenvironment_path: ./.env\nwarehouse:\n  connection_string: ${INSURANCE_ETL_FROM_DOTENV}\nentities:\n  - entity: claims\n    source: data/claims.csv\n",
        );
        fs::write(dir.path().join(".env"), "INSURANCE_ETL_FROM_DOTENV=host=localhost\n").unwrap();

        let manifest = read_manifest(&path).unwrap();
        assert_eq!(manifest.warehouse.connection_string.as_deref(), Some("host=localhost"));
    }

    #[test]
    fn test_duplicate_entities_are_rejected() {
        let (_dir, path) = write_project(
            "name: x\nentities:\n  - entity: claims\n    source: data/claims.csv\n  - entity: CLAIMS\n    source: data/claims.csv\n",
        );

        assert!(matches!(
            read_manifest(&path),
            Err(ReadManifestError::CouldNotValidateManifest(
                ValidateManifestError::EntityMustBeUnique(_)
            ))
        ));
    }

    #[test]
    fn test_missing_source_is_rejected() {
        let (_dir, path) =
            write_project("name: x\nentities:\n  - entity: agents\n    source: data/agents.csv\n");

        assert!(matches!(
            read_manifest(&path),
            Err(ReadManifestError::CouldNotValidateManifest(
                ValidateManifestError::SourceFileNotFound(_, _)
            ))
        ));
        assert!(read_manifest_without_sources(&path).is_ok());
    }

    #[test]
    fn test_starter_manifest_round_trips_through_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(YAML_CONFIG_NAME);
        let manifest = Manifest::starter("insurance");

        write_manifest(&manifest, &path).unwrap();
        let written = fs::read_to_string(&path).unwrap();

        assert!(written.contains("connection_string: ${DATABASE_URL}"));
        assert!(written.contains("entity: payments"));
        assert!(validate_manifest_shape(&manifest).is_ok());
    }
}
