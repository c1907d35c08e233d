//! Synthetic source data, appended to an entity's CSV so repeated runs keep producing new keys.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use chrono::{Duration, NaiveDate};
use csv::ReaderBuilder;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::info;

use crate::{
    extract::normalize_header,
    schema::{EntityDefinition, EntityKind},
    simple_file_formatters::csv::{AsyncCsvAppender, CsvAppendError},
};

#[derive(thiserror::Error, Debug)]
pub enum GenerateError {
    #[error("Duplicate rate must be between 0 and 1, got {0}")]
    InvalidDuplicateRate(f64),

    #[error("Could not read existing file {0}: {1}")]
    CouldNotReadExisting(PathBuf, csv::Error),

    #[error("Could not append generated rows: {0}")]
    CouldNotAppend(#[from] CsvAppendError),
}

#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub rows: usize,
    /// Share of rows that repeat an earlier generated row, exercising deduplication.
    pub duplicate_rate: f64,
    pub seed: Option<u64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { rows: 200, duplicate_rate: 0.05, seed: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedRows {
    pub entity: EntityKind,
    pub path: PathBuf,
    pub rows_written: usize,
    pub duplicates: usize,
    pub first_id: String,
    pub last_id: String,
}

pub fn id_prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Claims => "CLM",
        EntityKind::Policies => "POL",
        EntityKind::Customers => "CUST",
        EntityKind::Agents => "AGT",
        EntityKind::Payments => "PAY",
    }
}

fn format_id(kind: EntityKind, sequence: u64) -> String {
    format!("{}{:03}", id_prefix(kind), sequence)
}

fn canonical_header(definition: &EntityDefinition, raw: &str) -> String {
    let header = normalize_header(raw);
    definition
        .aliases
        .iter()
        .find(|(alias, _)| *alias == header)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(header)
}

/// Header of an existing file mapped onto canonical names, plus the highest id sequence in it.
fn read_existing(
    path: &Path,
    definition: &EntityDefinition,
) -> Result<Option<(Vec<String>, u64)>, GenerateError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return Ok(None),
    };
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(file);
    let error = |e: csv::Error| GenerateError::CouldNotReadExisting(path.to_path_buf(), e);

    let header: Vec<String> =
        reader.headers().map_err(error)?.iter().map(|h| canonical_header(definition, h)).collect();
    if header.iter().all(|h| h.is_empty()) {
        return Ok(None);
    }

    let prefix = id_prefix(definition.kind);
    let key_index = header.iter().position(|h| h == definition.schema.merge_key());
    let mut last_sequence = 0;
    if let Some(key_index) = key_index {
        for record in reader.records() {
            let record = record.map_err(error)?;
            let sequence = record
                .get(key_index)
                .map(|id| id.trim().to_ascii_uppercase())
                .and_then(|id| id.strip_prefix(prefix).and_then(|digits| digits.parse::<u64>().ok()));
            if let Some(sequence) = sequence {
                last_sequence = last_sequence.max(sequence);
            }
        }
    }

    Ok(Some((header, last_sequence)))
}

fn pick<'a>(rng: &mut StdRng, values: &[&'a str]) -> &'a str {
    values[rng.random_range(0..values.len())]
}

fn phone(rng: &mut StdRng) -> String {
    format!(
        "({})-{}-{}",
        rng.random_range(200..999),
        rng.random_range(200..999),
        rng.random_range(1000..9999)
    )
}

fn day_after(start: NaiveDate, rng: &mut StdRng, max_days: i64) -> NaiveDate {
    start + Duration::days(rng.random_range(0..max_days))
}

fn base_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

const FIRST_NAMES: [&str; 10] =
    ["James", "Mary", "John", "Patricia", "Robert", "Jennifer", "Michael", "Linda", "David", "Sarah"];
const LAST_NAMES: [&str; 10] =
    ["Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Clark", "Walker"];

/// One synthetic row as canonical column -> value.
fn synthesize(kind: EntityKind, id: &str, rng: &mut StdRng) -> Vec<(&'static str, String)> {
    match kind {
        EntityKind::Claims => {
            let status = pick(rng, &["Approved", "Pending", "Denied"]);
            let amount = if status == "Denied" { 0.0 } else { rng.random_range(100.0..50000.0) };
            let incident = base_date(2023, rng.random_range(1..=12), rng.random_range(1..=28));
            let claimed = incident + Duration::days(rng.random_range(0..=5));
            vec![
                ("CLAIM_ID", id.to_string()),
                ("POLICY_ID", format!("POL{}", rng.random_range(143..400))),
                ("CUSTOMER_ID", format!("CUST{}", rng.random_range(1021..1500))),
                ("CLAIM_AMOUNT", format!("{:.2}", amount)),
                ("CLAIM_DATE", claimed.format("%Y-%m-%d").to_string()),
                ("INCIDENT_DATE", incident.format("%Y-%m-%d").to_string()),
                ("CLAIM_TYPE", pick(rng, &["Auto", "Home", "Health"]).to_string()),
                ("STATUS", status.to_string()),
                (
                    "ADJUSTER_NOTES",
                    pick(
                        rng,
                        &[
                            "Minor damages, covered in full.",
                            "Investigation ongoing.",
                            "Repair estimate pending.",
                            "Police report submitted.",
                            "Flood damage documented.",
                        ],
                    )
                    .to_string(),
                ),
            ]
        }
        EntityKind::Policies => {
            let effective = day_after(base_date(2015, 1, 1), rng, 365 * 5);
            vec![
                ("POLICY_ID", id.to_string()),
                ("CUSTOMER_ID", format!("CUST{}", rng.random_range(1021..1500))),
                ("POLICY_TYPE", pick(rng, &["Auto", "Home", "Life", "Health", "Commercial"]).to_string()),
                ("EFFECTIVE_DATE", effective.format("%Y-%m-%d").to_string()),
                ("EXPIRATION_DATE", (effective + Duration::days(365)).format("%Y-%m-%d").to_string()),
                ("PREMIUM_AMOUNT", format!("{:.2}", rng.random_range(500.0..5000.0))),
                ("STATUS", pick(rng, &["Active", "Expired", "Cancelled"]).to_string()),
                ("AGENT_ID", format!("AGT{}", rng.random_range(100..999))),
            ]
        }
        EntityKind::Customers => {
            let first = pick(rng, &FIRST_NAMES);
            let last = pick(rng, &LAST_NAMES);
            vec![
                ("CUSTOMER_ID", id.to_string()),
                ("FIRST_NAME", first.to_string()),
                ("LAST_NAME", last.to_string()),
                (
                    "DATE_OF_BIRTH",
                    day_after(base_date(1940, 1, 1), rng, 22_645).format("%Y-%m-%d").to_string(),
                ),
                ("GENDER", pick(rng, &["M", "F"]).to_string()),
                (
                    "EMAIL",
                    format!(
                        "{}.{}{}@example.com",
                        first.to_lowercase(),
                        last.to_lowercase(),
                        rng.random_range(100..999)
                    ),
                ),
                ("PHONE", phone(rng)),
                (
                    "ADDRESS",
                    format!(
                        "{} {}",
                        rng.random_range(100..9999),
                        pick(rng, &["Main St", "Oak St", "Pine Ave", "Maple Rd", "Cedar Blvd"])
                    ),
                ),
                (
                    "CITY",
                    pick(rng, &["Sacramento", "Austin", "New York", "Miami", "Chicago", "Atlanta"])
                        .to_string(),
                ),
                ("STATE", pick(rng, &["CA", "TX", "NY", "FL", "IL", "GA"]).to_string()),
                ("ZIP_CODE", rng.random_range(10000..99999).to_string()),
            ]
        }
        EntityKind::Agents => {
            let first = pick(rng, &FIRST_NAMES);
            let last = pick(rng, &LAST_NAMES);
            vec![
                ("AGENT_ID", id.to_string()),
                ("FIRST_NAME", first.to_string()),
                ("LAST_NAME", last.to_string()),
                (
                    "EMAIL",
                    format!(
                        "{}.{}{}@insuranceco.com",
                        first.to_lowercase(),
                        last.to_lowercase(),
                        rng.random_range(10..99)
                    ),
                ),
                ("PHONE", phone(rng)),
                (
                    "AGENCY_NAME",
                    pick(rng, &["West Region", "Midwest Region", "South Region", "Northeast Region"])
                        .to_string(),
                ),
            ]
        }
        EntityKind::Payments => vec![
            ("PAYMENT_ID", id.to_string()),
            ("POLICY_ID", format!("POL{}", rng.random_range(143..400))),
            (
                "PAYMENT_DATE",
                day_after(base_date(2024, 1, 1), rng, 365).format("%Y-%m-%d").to_string(),
            ),
            ("PAYMENT_AMOUNT", format!("{:.2}", rng.random_range(40.0..500.0))),
            ("PAYMENT_METHOD", pick(rng, &["Credit Card", "Bank Transfer", "Check"]).to_string()),
            ("STATUS", pick(rng, &["Completed", "Pending", "Failed"]).to_string()),
        ],
    }
}

/// Appends `options.rows` synthetic rows to `path`, continuing the id sequence already in the file
/// and creating it with a canonical header when it does not exist.
pub async fn generate_rows(
    kind: EntityKind,
    path: &Path,
    options: GenerateOptions,
) -> Result<GeneratedRows, GenerateError> {
    if !(0.0..=1.0).contains(&options.duplicate_rate) {
        return Err(GenerateError::InvalidDuplicateRate(options.duplicate_rate));
    }

    let definition = kind.definition();
    let (header, last_sequence) = match read_existing(path, &definition)? {
        Some(existing) => existing,
        None => (definition.required_columns().iter().map(|c| c.to_string()).collect(), 0),
    };

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut records: Vec<Vec<String>> = Vec::with_capacity(options.rows);
    let mut duplicates = 0;
    for offset in 1..=options.rows as u64 {
        if !records.is_empty() && rng.random_bool(options.duplicate_rate) {
            let index = rng.random_range(0..records.len());
            records.push(records[index].clone());
            duplicates += 1;
            continue;
        }

        let id = format_id(kind, last_sequence + offset);
        let values = synthesize(kind, &id, &mut rng);
        let record = header
            .iter()
            .map(|column| {
                values
                    .iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect();
        records.push(record);
    }

    let rows_written = records.len();
    let appender = AsyncCsvAppender::new(path);
    appender.append_bulk(header, records).await?;

    let result = GeneratedRows {
        entity: kind,
        path: path.to_path_buf(),
        rows_written,
        duplicates,
        first_id: format_id(kind, last_sequence + 1),
        last_id: format_id(kind, last_sequence + options.rows as u64),
    };
    info!(
        "{} - generated {} rows ({} duplicates) into {}",
        kind,
        result.rows_written,
        result.duplicates,
        path.display()
    );

    Ok(result)
}
