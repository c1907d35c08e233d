use std::{
    io::{Seek, SeekFrom},
    path::Path,
};

use chrono::NaiveDateTime;
use csv::{ReaderBuilder, WriterBuilder};
use tempfile::NamedTempFile;

use crate::{batch::Batch, schema::LOAD_TS_COLUMN};

#[derive(thiserror::Error, Debug)]
pub enum StagingError {
    #[error("Could not create staging file: {0}")]
    CouldNotCreateFile(std::io::Error),

    #[error("Could not write staging file: {0}")]
    CouldNotWrite(csv::Error),

    #[error("Could not read staging file: {0}")]
    CouldNotRead(csv::Error),

    #[error("Could not rewind staging file: {0}")]
    CouldNotRewind(std::io::Error),

    #[error("Could not remove staging file: {0}")]
    CouldNotRemove(std::io::Error),
}

/// A stamped batch written to a private temporary CSV file.
///
/// The file is deleted when the value is dropped, [`StagedBatch::remove`] does it eagerly and
/// reports failures.
#[derive(Debug)]
pub struct StagedBatch {
    file: NamedTempFile,
    columns: Vec<String>,
    rows: usize,
}

pub const STAGING_FILE_PREFIX: &str = "insurance_etl_stage_";

/// Writes `columns` of every row plus the load timestamp. Nulls are written as empty cells.
///
/// The file goes to `directory` when given, otherwise to the system temp directory.
pub fn stage_batch(
    batch: &Batch,
    columns: &[&str],
    load_timestamp: NaiveDateTime,
    directory: Option<&Path>,
) -> Result<StagedBatch, StagingError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(STAGING_FILE_PREFIX).suffix(".csv");
    let mut file = match directory {
        Some(directory) => builder.tempfile_in(directory),
        None => builder.tempfile(),
    }
    .map_err(StagingError::CouldNotCreateFile)?;

    let indexes: Vec<Option<usize>> = columns.iter().map(|c| batch.column_index(c)).collect();
    let stamp = load_timestamp.format("%Y-%m-%d %H:%M:%S").to_string();

    let mut header: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    header.push(LOAD_TS_COLUMN.to_string());

    {
        let mut writer = WriterBuilder::new().from_writer(file.as_file_mut());
        writer.write_record(&header).map_err(StagingError::CouldNotWrite)?;

        for row in batch.rows() {
            let mut record: Vec<&str> = indexes
                .iter()
                .map(|index| index.and_then(|i| row[i].as_deref()).unwrap_or(""))
                .collect();
            record.push(&stamp);
            writer.write_record(&record).map_err(StagingError::CouldNotWrite)?;
        }
        writer.flush().map_err(|e| StagingError::CouldNotWrite(e.into()))?;
    }

    Ok(StagedBatch { file, columns: header, rows: batch.len() })
}

impl StagedBatch {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    /// Reads the staged rows back in order, empty cells as `None`.
    pub fn read_rows(&mut self) -> Result<Vec<Vec<Option<String>>>, StagingError> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(0)).map_err(StagingError::CouldNotRewind)?;

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut rows = Vec::with_capacity(self.rows);
        for record in reader.records() {
            let record = record.map_err(StagingError::CouldNotRead)?;
            rows.push(
                record
                    .iter()
                    .map(|cell| if cell.is_empty() { None } else { Some(cell.to_string()) })
                    .collect(),
            );
        }
        Ok(rows)
    }

    pub fn remove(self) -> Result<(), StagingError> {
        self.file.close().map_err(StagingError::CouldNotRemove)
    }
}
