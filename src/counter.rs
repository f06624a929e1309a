//! Date-stamped send counter kept in a single JSON file.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;

/// Persisted shape: `{"date":"YYYY-MM-DD","count":N}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub date: NaiveDate,
    pub count: u64,
}

impl CounterRecord {
    pub fn fresh(today: NaiveDate) -> Self {
        Self {
            date: today,
            count: 0,
        }
    }
}

/// Counter of primary-provider sends for the current UTC day.
///
/// Every operation rereads the file and holds `lock` while doing so, so two
/// requests never interleave their file accesses. Nothing holds the lock
/// between a read and a later `increment`.
#[derive(Debug)]
pub struct DailyCounterStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DailyCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn ensure_fresh(&self) -> Result<CounterRecord, StorageError> {
        self.ensure_fresh_on(today()).await
    }

    /// Creates the record if absent and resets it when it belongs to another day.
    pub async fn ensure_fresh_on(&self, today: NaiveDate) -> Result<CounterRecord, StorageError> {
        let _guard = self.lock.lock().await;

        match self.read().await? {
            Some(record) if record.date == today => Ok(record),
            Some(stale) => {
                info!(
                    path = %self.path.display(),
                    previous_date = %stale.date,
                    previous_count = stale.count,
                    "Resetting daily counter"
                );
                let record = CounterRecord::fresh(today);
                self.write(&record).await?;
                Ok(record)
            }
            None => {
                info!(path = %self.path.display(), "Creating daily counter");
                let record = CounterRecord::fresh(today);
                self.write(&record).await?;
                Ok(record)
            }
        }
    }

    /// Count stored for the record's day. Call `ensure_fresh` first.
    pub async fn get_count(&self) -> Result<u64, StorageError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_existing().await?.count)
    }

    /// Adds one to the stored count and returns the new value.
    pub async fn increment(&self) -> Result<u64, StorageError> {
        let _guard = self.lock.lock().await;

        let mut record = self.read_existing().await?;
        record.count += 1;
        self.write(&record).await?;

        debug!(count = record.count, "Counter incremented");
        Ok(record.count)
    }

    async fn read(&self) -> Result<Option<CounterRecord>, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    async fn read_existing(&self) -> Result<CounterRecord, StorageError> {
        self.read().await?.ok_or_else(|| {
            self.io_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "counter has not been initialized",
            ))
        })
    }

    // Whole-document replace via temp file + rename.
    async fn write(&self, record: &CounterRecord) -> Result<(), StorageError> {
        let json = serde_json::to_string(record).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
