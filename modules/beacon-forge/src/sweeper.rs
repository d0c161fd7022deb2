//! Failover catch-up sweeper.
//!
//! Periodically scans the failover directory for journals the Edge wrote
//! while the pipe was down and feeds them into the enrichment channel,
//! oldest file first. A file is deleted only after a clean end-of-file;
//! sustained backpressure or shutdown mid-file leaves it for the next scan.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use beacon_common::{CaptureRecord, ShutdownSignal};

const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, PartialEq, Eq)]
enum FileOutcome {
    /// Fully consumed and deleted.
    Consumed { records: usize, malformed: usize },
    /// Backpressure or shutdown; file kept for the next scan.
    Abandoned,
}

pub struct FailoverSweeper {
    dir: PathBuf,
    interval: Duration,
    tx: mpsc::Sender<CaptureRecord>,
    shutdown: ShutdownSignal,
}

impl FailoverSweeper {
    pub fn new(
        dir: PathBuf,
        interval_secs: u64,
        tx: mpsc::Sender<CaptureRecord>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            dir,
            interval: Duration::from_secs(interval_secs.max(1)),
            tx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.recv() => break,
            }
            self.sweep().await;
        }
        info!("Failover sweeper stopped");
    }

    /// One pass over the directory, oldest file first. The date-stamped
    /// names sort lexically, so a plain name sort is chronological.
    pub async fn sweep(&mut self) {
        let mut files = match journal_files(&self.dir) {
            Ok(files) => files,
            Err(e) => {
                // Directory may simply not exist until the first failover.
                tracing::debug!(dir = %self.dir.display(), error = %e, "Failover scan skipped");
                return;
            }
        };
        files.sort();

        for path in files {
            if self.shutdown.is_shutdown() {
                return;
            }
            match self.consume_file(&path).await {
                FileOutcome::Consumed { records, malformed } => {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %e, "Could not delete consumed journal");
                    } else {
                        info!(
                            path = %path.display(),
                            records,
                            malformed,
                            "Journal re-ingested"
                        );
                    }
                }
                FileOutcome::Abandoned => {
                    // Retry the whole scan later; order must stay oldest-first.
                    return;
                }
            }
        }
    }

    async fn consume_file(&mut self, path: &Path) -> FileOutcome {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not open journal");
                return FileOutcome::Abandoned;
            }
        };

        let mut lines = BufReader::new(file).lines();
        let mut records = 0usize;
        let mut malformed = 0usize;

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = self.shutdown.recv() => return FileOutcome::Abandoned,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Journal read error");
                    return FileOutcome::Abandoned;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let record = match CaptureRecord::from_line(&line) {
                Ok(record) => record,
                Err(_) => {
                    malformed += 1;
                    continue;
                }
            };
            match self.tx.send_timeout(record, ENQUEUE_TIMEOUT).await {
                Ok(()) => records += 1,
                Err(_) => {
                    warn!(path = %path.display(), "Enrichment backpressure, abandoning journal for now");
                    return FileOutcome::Abandoned;
                }
            }
        }

        FileOutcome::Consumed { records, malformed }
    }
}

fn journal_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::Shutdown;
    use chrono::Utc;

    fn line(n: u32) -> String {
        CaptureRecord {
            company: "co".into(),
            pixel: format!("px{n}"),
            ip: "1.2.3.4".into(),
            path: "/co/px_SMART.GIF".into(),
            query: "sw=1".into(),
            headers: "{}".into(),
            ua: String::new(),
            referer: String::new(),
            received_at: Utc::now(),
        }
        .to_line()
        .unwrap()
    }

    fn sweeper(
        dir: &Path,
        capacity: usize,
    ) -> (FailoverSweeper, mpsc::Receiver<CaptureRecord>, Shutdown) {
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown, signal) = Shutdown::new();
        (
            FailoverSweeper::new(dir.to_path_buf(), 60, tx, signal),
            rx,
            shutdown,
        )
    }

    #[tokio::test]
    async fn consumes_oldest_first_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("failover_2025_03_02.jsonl"),
            format!("{}\n", line(2)),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("failover_2025_03_01.jsonl"),
            format!("{}\n", line(1)),
        )
        .unwrap();

        let (mut sweeper, mut rx, _shutdown) = sweeper(dir.path(), 16);
        sweeper.sweep().await;

        assert_eq!(rx.recv().await.unwrap().pixel, "px1");
        assert_eq!(rx.recv().await.unwrap().pixel, "px2");
        assert_eq!(journal_files(dir.path()).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn malformed_lines_are_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failover_2025_03_01.jsonl");
        std::fs::write(&path, format!("{}\nnot json\n\n{}\n", line(1), line(2))).unwrap();

        let (mut sweeper, mut rx, _shutdown) = sweeper(dir.path(), 16);
        sweeper.sweep().await;

        assert_eq!(rx.recv().await.unwrap().pixel, "px1");
        assert_eq!(rx.recv().await.unwrap().pixel, "px2");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sweeper, _rx, _shutdown) = sweeper(&dir.path().join("nope"), 16);
        sweeper.sweep().await;
    }

    #[tokio::test]
    async fn shutdown_mid_file_preserves_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failover_2025_03_01.jsonl");
        let mut contents = String::new();
        for n in 0..10 {
            contents.push_str(&line(n));
            contents.push('\n');
        }
        std::fs::write(&path, contents).unwrap();

        // Capacity 2 with no consumer: the third send must wait, and the
        // triggered shutdown abandons the file.
        let (tx, _rx) = mpsc::channel(2);
        let (shutdown, signal) = Shutdown::new();
        let mut sweeper = FailoverSweeper::new(dir.path().to_path_buf(), 60, tx, signal);
        shutdown.trigger();

        sweeper.sweep().await;
        assert!(path.exists());
    }
}
