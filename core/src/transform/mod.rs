//! Per-entity cleaning driven by the [`CleanRule`] table attached to each entity.

mod cleaners;

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

pub use cleaners::{format_phone, normalize_gender, parse_date, parse_datetime, parse_decimal, title_case};

use crate::{
    batch::{Batch, Cell},
    extract::ExtractedTable,
    schema::{CleanRule, EntityDefinition},
};

/// What the transformer changed, replacing ad hoc progress output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformDiagnostics {
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates_removed: usize,
    pub missing_key_rows_removed: usize,
    /// Column -> number of cells that could not be parsed as a date and became null.
    pub unknown_dates: BTreeMap<String, usize>,
    /// Column -> number of cells that could not be parsed as a number and were left as-is.
    pub unparseable_numbers: BTreeMap<String, usize>,
    /// Column -> number of nulls filled with the entity default.
    pub defaults_filled: BTreeMap<String, usize>,
}

impl TransformDiagnostics {
    pub fn unknown_date_count(&self) -> usize {
        self.unknown_dates.values().sum()
    }

    pub fn unparseable_number_count(&self) -> usize {
        self.unparseable_numbers.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub batch: Batch,
    pub diagnostics: TransformDiagnostics,
}

fn bump(counter: &mut BTreeMap<String, usize>, column: &str) {
    *counter.entry(column.to_string()).or_default() += 1;
}

fn apply_rule(
    rule: CleanRule,
    column: &str,
    cell: Cell,
    diagnostics: &mut TransformDiagnostics,
) -> Cell {
    match rule {
        CleanRule::Default(default) => match cell {
            None => {
                bump(&mut diagnostics.defaults_filled, column);
                Some(default.to_string())
            }
            value => value,
        },
        // these two normalize missing values as well
        CleanRule::Phone => Some(format_phone(cell.as_deref())),
        CleanRule::Gender => Some(normalize_gender(cell.as_deref())),
        _ => {
            let value = cell?;
            match rule {
                CleanRule::Decimal => match parse_decimal(&value) {
                    Some(number) => Some(number.normalize().to_string()),
                    None => {
                        bump(&mut diagnostics.unparseable_numbers, column);
                        Some(value)
                    }
                },
                CleanRule::Date => match parse_date(&value) {
                    Some(date) => Some(date.format("%Y-%m-%d").to_string()),
                    None => {
                        bump(&mut diagnostics.unknown_dates, column);
                        None
                    }
                },
                CleanRule::TitleCase => Some(title_case(&value)),
                CleanRule::Lowercase => Some(value.to_lowercase()),
                CleanRule::Uppercase => Some(value.to_uppercase()),
                CleanRule::ZipCode => Some(cleaners::normalize_zip_code(&value)),
                CleanRule::Default(_) | CleanRule::Phone | CleanRule::Gender => Some(value),
            }
        }
    }
}

fn trim_cell(cell: Cell) -> Cell {
    cell.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Cleans an extracted batch for one entity.
///
/// Rows whose merge key is blank are dropped, duplicate keys keep their first occurrence and
/// malformed dates become null rather than dropping the row.
pub fn transform(definition: &EntityDefinition, batch: Batch) -> TransformOutput {
    let kind = definition.kind;
    let merge_key = definition.schema.merge_key();
    let columns = batch.columns().to_vec();
    let key_index = batch.column_index(merge_key);

    let mut diagnostics = TransformDiagnostics { rows_in: batch.len(), ..Default::default() };
    let mut seen_keys: HashSet<String> = HashSet::new();
    let mut cleaned = Batch::new(columns.clone());

    for row in batch.into_rows() {
        let row: Vec<Cell> = row.into_iter().map(trim_cell).collect();

        if let Some(index) = key_index {
            match &row[index] {
                None => {
                    diagnostics.missing_key_rows_removed += 1;
                    continue;
                }
                Some(key) if !seen_keys.insert(key.clone()) => {
                    diagnostics.duplicates_removed += 1;
                    continue;
                }
                Some(_) => {}
            }
        }

        let row = row
            .into_iter()
            .zip(columns.iter())
            .map(|(cell, column)| {
                definition
                    .rules_for(column)
                    .iter()
                    .fold(cell, |cell, rule| apply_rule(*rule, column, cell, &mut diagnostics))
            })
            .collect();
        cleaned.push_row(row);
    }

    diagnostics.rows_out = cleaned.len();

    if key_index.is_none() {
        warn!("{} - merge key {} not present, rows were not deduplicated", kind, merge_key);
    }
    if diagnostics.duplicates_removed > 0 || diagnostics.missing_key_rows_removed > 0 {
        info!(
            "{} - removed {} duplicate and {} keyless rows",
            kind, diagnostics.duplicates_removed, diagnostics.missing_key_rows_removed
        );
    }
    if diagnostics.unknown_date_count() > 0 {
        warn!("{} - unparseable dates set to null: {:?}", kind, diagnostics.unknown_dates);
    }
    if diagnostics.unparseable_number_count() > 0 {
        warn!("{} - unparseable numbers left for the loader to reject: {:?}", kind, diagnostics.unparseable_numbers);
    }
    debug!("{} - transform diagnostics {:?}", kind, diagnostics);

    TransformOutput { batch: cleaned, diagnostics }
}

/// Convenience over [`transform`] for the extractor's output.
pub fn transform_extracted(definition: &EntityDefinition, table: ExtractedTable) -> TransformOutput {
    transform(definition, table.batch)
}
