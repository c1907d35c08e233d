use std::{
    collections::HashMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use csv::ReaderBuilder;
use tracing::{debug, info, warn};

use crate::{batch::Batch, schema::EntityDefinition};

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Could not open source file {0}: {1}")]
    CouldNotOpenFile(PathBuf, std::io::Error),

    #[error("Could not read CSV {0}: {1}")]
    CsvError(PathBuf, csv::Error),

    #[error("Source file {0} has no header row")]
    MissingHeader(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTable {
    /// Rows projected onto the required columns that were found, in required order.
    pub batch: Batch,
    /// Required columns absent from the source, reported but not fatal.
    pub missing_columns: Vec<String>,
}

pub fn normalize_header(raw: &str) -> String {
    raw.trim().trim_start_matches('\u{feff}').trim().to_ascii_uppercase()
}

fn normalize_cell(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Maps each normalized source header to its canonical name, or `None` when it is not wanted.
fn resolve_headers(headers: &[String], definition: &EntityDefinition) -> Vec<Option<String>> {
    let required = definition.required_columns();
    let aliases: HashMap<&str, &str> = definition.aliases.iter().copied().collect();

    let mut taken: Vec<String> = Vec::new();
    let mut resolved = Vec::with_capacity(headers.len());

    // Canonical headers claim their column before any alias can.
    for header in headers {
        if required.contains(&header.as_str()) && !taken.contains(header) {
            taken.push(header.clone());
        }
    }

    for header in headers {
        if required.contains(&header.as_str()) {
            resolved.push(Some(header.clone()));
            continue;
        }

        match aliases.get(header.as_str()) {
            Some(canonical) if !taken.iter().any(|t| t == canonical) => {
                debug!("Mapping source column {} onto {}", header, canonical);
                taken.push(canonical.to_string());
                resolved.push(Some(canonical.to_string()));
            }
            Some(canonical) => {
                debug!("Ignoring alias {} as {} is already present", header, canonical);
                resolved.push(None);
            }
            None => {
                debug!("Dropping unexpected column {}", header);
                resolved.push(None);
            }
        }
    }

    resolved
}

pub fn extract_from_reader<R: Read>(
    reader: R,
    source: &Path,
    definition: &EntityDefinition,
) -> Result<ExtractedTable, ExtractError> {
    let mut csv_reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(|e| ExtractError::CsvError(source.to_path_buf(), e))?
        .iter()
        .map(normalize_header)
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(ExtractError::MissingHeader(source.to_path_buf()));
    }

    let resolved = resolve_headers(&headers, definition);

    let required = definition.required_columns();
    let present: Vec<&str> =
        required.iter().copied().filter(|c| resolved.iter().flatten().any(|r| r == c)).collect();
    let missing_columns: Vec<String> = required
        .iter()
        .filter(|c| !present.contains(*c))
        .map(|c| c.to_string())
        .collect();

    if !missing_columns.is_empty() {
        warn!(
            "{} - missing required columns in {}: {:?}",
            definition.kind,
            source.display(),
            missing_columns
        );
    }

    // source position for every projected column
    let projection: Vec<usize> = present
        .iter()
        .filter_map(|column| resolved.iter().position(|r| r.as_deref() == Some(*column)))
        .collect();

    let mut batch = Batch::new(present.iter().map(|c| c.to_string()).collect());
    for record in csv_reader.records() {
        let record = record.map_err(|e| ExtractError::CsvError(source.to_path_buf(), e))?;
        let row = projection.iter().map(|index| record.get(*index).and_then(normalize_cell)).collect();
        batch.push_row(row);
    }

    info!("{} - extracted {} records from {}", definition.kind, batch.len(), source.display());

    Ok(ExtractedTable { batch, missing_columns })
}

/// Reads a CSV, normalizes and aliases its headers and projects it onto the entity's columns.
pub fn extract_from_csv(
    path: &Path,
    definition: &EntityDefinition,
) -> Result<ExtractedTable, ExtractError> {
    let file = File::open(path).map_err(|e| ExtractError::CouldNotOpenFile(path.to_path_buf(), e))?;
    extract_from_reader(file, path, definition)
}
