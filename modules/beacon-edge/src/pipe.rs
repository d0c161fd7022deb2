//! The single pipe-writer task.
//!
//! Owns the only client handle to the Forge's local socket. Drains the
//! capture queue, writes one JSON line per record with a flush after each,
//! and falls back to the failover journal whenever the pipe is down. While
//! journaling, reconnects are attempted at most once per retry interval.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::UnixStream;
use tracing::{error, info, warn};

use beacon_common::{CaptureRecord, ShutdownSignal};

use crate::journal::JournalWriter;
use crate::queue::CaptureQueue;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_CHUNK: usize = 256;

pub struct PipeWriter {
    socket_path: PathBuf,
    retry_interval: Duration,
    queue: Arc<CaptureQueue>,
    journal: JournalWriter,
    shutdown: ShutdownSignal,
}

impl PipeWriter {
    pub fn new(
        socket_path: PathBuf,
        retry_interval_secs: u64,
        queue: Arc<CaptureQueue>,
        journal: JournalWriter,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            socket_path,
            retry_interval: Duration::from_secs(retry_interval_secs.max(1)),
            queue,
            journal,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut conn: Option<BufWriter<UnixStream>> = None;
        let mut last_attempt: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = self.queue.wait_nonempty() => {}
                _ = self.shutdown.recv() => break,
            }
            let batch = self.queue.drain(DRAIN_CHUNK);
            if !batch.is_empty() {
                self.dispatch(&mut conn, &mut last_attempt, batch).await;
            }
        }

        // Final drain: push whatever is left to the pipe or the journal.
        loop {
            let batch = self.queue.drain(DRAIN_CHUNK);
            if batch.is_empty() {
                break;
            }
            self.dispatch(&mut conn, &mut last_attempt, batch).await;
        }
        info!("Pipe writer stopped");
    }

    async fn dispatch(
        &self,
        conn: &mut Option<BufWriter<UnixStream>>,
        last_attempt: &mut Option<Instant>,
        batch: Vec<CaptureRecord>,
    ) {
        if conn.is_none() && self.reconnect_due(*last_attempt) {
            *last_attempt = Some(Instant::now());
            *conn = self.connect().await;
        }

        let mut remaining: &[CaptureRecord] = &batch;
        if let Some(stream) = conn.as_mut() {
            match write_records(stream, remaining).await {
                Ok(()) => return,
                Err((written, e)) => {
                    warn!(error = %e, "Pipe write failed, switching to journal");
                    *conn = None;
                    remaining = &remaining[written..];
                }
            }
        }

        if let Err(e) = self.journal.append(remaining).await {
            error!(count = remaining.len(), error = %e, "Journal append failed, records lost");
        }
    }

    fn reconnect_due(&self, last_attempt: Option<Instant>) -> bool {
        match last_attempt {
            None => true,
            Some(at) => at.elapsed() >= self.retry_interval,
        }
    }

    async fn connect(&self) -> Option<BufWriter<UnixStream>> {
        match tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(stream)) => {
                info!(path = %self.socket_path.display(), "Pipe connected");
                Some(BufWriter::new(stream))
            }
            Ok(Err(e)) => {
                warn!(path = %self.socket_path.display(), error = %e, "Pipe connect failed");
                None
            }
            Err(_) => {
                warn!(path = %self.socket_path.display(), "Pipe connect timed out");
                None
            }
        }
    }
}

/// Write records as newline-terminated JSON, flushing after each line. On
/// error, returns how many records were fully flushed so the caller can
/// journal the rest without duplicating any.
async fn write_records(
    stream: &mut BufWriter<UnixStream>,
    records: &[CaptureRecord],
) -> std::result::Result<(), (usize, std::io::Error)> {
    for (i, record) in records.iter().enumerate() {
        let line = match record.to_line() {
            Ok(line) => line,
            Err(e) => {
                // Unserializable records cannot be journaled either; skip.
                warn!(error = %e, "Dropping unserializable record");
                continue;
            }
        };
        let write = async {
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        };
        if let Err(e) = write.await {
            return Err((i, e));
        }
    }
    Ok(())
}
