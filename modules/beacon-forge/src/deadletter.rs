//! Dead-letter batches.
//!
//! A batch that exhausts its write retries is serialized whole to a JSON
//! file; startup replays the directory in lexical (= chronological) order.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use beacon_common::{CaptureRecord, Result};

pub struct DeadLetterStore {
    dir: PathBuf,
}

impl DeadLetterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a failed batch. Returns the file path.
    pub async fn write(&self, records: &[CaptureRecord]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!(
            "deadletter_{}_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S"),
            Uuid::new_v4()
        );
        let path = self.dir.join(name);
        let body = serde_json::to_vec(records)?;
        tokio::fs::write(&path, body).await?;
        info!(path = %path.display(), records = records.len(), "Batch dead-lettered");
        Ok(path)
    }

    /// Dead-letter files in replay order.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_deadletter = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("deadletter_") && n.ends_with(".json"));
                if is_deadletter {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<CaptureRecord>> {
        let body = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn remove(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}
