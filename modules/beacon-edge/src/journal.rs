//! Day-rolling failover journal.
//!
//! When the pipe is down, the writer appends records here as one JSON object
//! per line. Files roll by UTC date and are opened per flush, so the Forge
//! sweeper can delete a consumed file without racing an open handle.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use beacon_common::{CaptureRecord, Result};

pub struct JournalWriter {
    dir: PathBuf,
}

/// `failover_YYYY_MM_DD.jsonl` for the given UTC date.
pub fn file_name(date: NaiveDate) -> String {
    format!("failover_{}.jsonl", date.format("%Y_%m_%d"))
}

impl JournalWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a batch to today's journal file, creating directory and file as
    /// needed. Returns the number of records written.
    pub async fn append(&self, records: &[CaptureRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name(Utc::now().date_naive()));

        let mut buf = String::new();
        for record in records {
            buf.push_str(&record.to_line()?);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        debug!(count = records.len(), path = %path.display(), "Journaled records");
        Ok(records.len())
    }
}
