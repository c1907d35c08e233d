use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use csv::Writer;
use tokio::{sync::Mutex, task::JoinError};

#[derive(thiserror::Error, Debug)]
pub enum CsvAppendError {
    #[error("Could not create directory for {0}: {1}")]
    CouldNotCreateDirectory(PathBuf, std::io::Error),

    #[error("Could not write CSV: {0}")]
    CsvError(#[from] csv::Error),

    #[error("CSV write task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

/// Appends records to a CSV file from async code, writing the header only when the file is new.
#[derive(Clone)]
pub struct AsyncCsvAppender {
    path: Arc<Path>,
    writer_lock: Arc<Mutex<()>>,
}

impl AsyncCsvAppender {
    pub fn new(file_path: &Path) -> Self {
        AsyncCsvAppender {
            path: Arc::from(file_path.to_path_buf()),
            writer_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append_bulk(
        &self,
        header: Vec<String>,
        records: Vec<Vec<String>>,
    ) -> Result<(), CsvAppendError> {
        let lock = Arc::clone(&self.writer_lock);
        let path = Arc::clone(&self.path);

        tokio::task::spawn_blocking(move || {
            let _guard = lock.blocking_lock();

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .map_err(|e| CsvAppendError::CouldNotCreateDirectory(path.to_path_buf(), e))?;
            }

            let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
            let file = File::options()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(csv::Error::from)?;
            let mut writer = Writer::from_writer(file);

            if needs_header {
                writer.write_record(&header)?;
            }
            for record in records {
                writer.write_record(record)?;
            }
            writer.flush().map_err(csv::Error::from)?;

            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let appender = AsyncCsvAppender::new(&path);
        let header = vec!["A".to_string(), "B".to_string()];

        appender.append_bulk(header.clone(), vec![vec!["1".to_string(), "x".to_string()]]).await.unwrap();
        appender.append_bulk(header, vec![vec!["2".to_string(), "y, z".to_string()]]).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "A,B\n1,x\n2,\"y, z\"\n");
    }
}
