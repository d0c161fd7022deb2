//! The bulk writer.
//!
//! Single owner of the warehouse connection. Drains the enriched-record
//! channel into batches (size-capped, with the bulk timeout as a flush
//! hint), writes them through the circuit breaker, retries with fixed
//! delays, and dead-letters a batch that exhausts them. Startup replays any
//! dead-letter files through the same retry path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use beacon_common::{CaptureRecord, ShutdownSignal};
use beacon_warehouse::{SqlErrorClass, WarehouseClient};

use crate::breaker::{CircuitBreaker, Gate};
use crate::deadletter::DeadLetterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    DeadLettered,
    /// Retries exhausted without dead-lettering (replay path only).
    Failed,
}

pub struct BulkWriter {
    warehouse: WarehouseClient,
    rx: mpsc::Receiver<CaptureRecord>,
    breaker: Arc<CircuitBreaker>,
    deadletter: DeadLetterStore,
    batch_size: usize,
    bulk_timeout: Duration,
    retry_delays: Vec<Duration>,
    drain_timeout: Duration,
    shutdown: ShutdownSignal,
}

impl BulkWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        warehouse: WarehouseClient,
        rx: mpsc::Receiver<CaptureRecord>,
        breaker: Arc<CircuitBreaker>,
        deadletter: DeadLetterStore,
        batch_size: usize,
        bulk_timeout_secs: u64,
        retry_delays_secs: &[u64],
        drain_timeout_secs: u64,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            warehouse,
            rx,
            breaker,
            deadletter,
            batch_size: batch_size.max(1),
            bulk_timeout: Duration::from_secs(bulk_timeout_secs.max(1)),
            retry_delays: retry_delays_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            drain_timeout: Duration::from_secs(drain_timeout_secs),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        self.replay_deadletters().await;

        loop {
            let first = tokio::select! {
                record = self.rx.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
                _ = self.shutdown.recv() => break,
            };
            let batch =
                fill_batch(&mut self.rx, first, self.batch_size, self.bulk_timeout).await;
            self.write_batch(&batch, true).await;
        }

        self.drain().await;
        info!("Bulk writer stopped");
    }

    /// Write one batch through the breaker and the retry ladder.
    async fn write_batch(&self, batch: &[CaptureRecord], deadletter_on_exhaust: bool) -> WriteOutcome {
        let mut delays_used = 0usize;
        loop {
            // Hold while the circuit is open. During shutdown there is no
            // time to wait out a cooldown; fail the batch to disk instead.
            loop {
                match self.breaker.check() {
                    Gate::Proceed | Gate::Probe => break,
                    Gate::Wait(wait) => {
                        if self.shutdown.is_shutdown() {
                            return self.give_up(batch, deadletter_on_exhaust).await;
                        }
                        tokio::time::sleep(wait).await;
                    }
                }
            }

            match self.warehouse.bulk_insert_raw(batch).await {
                Ok(rows) => {
                    self.breaker.record_success();
                    tracing::debug!(rows, "Batch written");
                    return WriteOutcome::Written;
                }
                Err(e) => {
                    let class = e.class();
                    self.breaker.record_failure(class, &e.to_string());
                    if class == SqlErrorClass::Deadlock {
                        warn!(error = %e, "Deadlock victim, retrying batch");
                    } else {
                        warn!(error = %e, attempt = delays_used + 1, "Batch write failed");
                    }
                    if delays_used < self.retry_delays.len() {
                        tokio::time::sleep(self.retry_delays[delays_used]).await;
                        delays_used += 1;
                    } else {
                        return self.give_up(batch, deadletter_on_exhaust).await;
                    }
                }
            }
        }
    }

    async fn give_up(&self, batch: &[CaptureRecord], deadletter_on_exhaust: bool) -> WriteOutcome {
        if !deadletter_on_exhaust {
            return WriteOutcome::Failed;
        }
        match self.deadletter.write(batch).await {
            Ok(_) => WriteOutcome::DeadLettered,
            Err(e) => {
                error!(records = batch.len(), error = %e, "Dead-letter write failed, records lost");
                WriteOutcome::Failed
            }
        }
    }

    /// Replay dead-letter files, oldest first, deleting each on success.
    /// A failed replay stops the pass; remaining files wait for the next
    /// startup rather than being re-dead-lettered.
    async fn replay_deadletters(&self) {
        let files = self.deadletter.files();
        if files.is_empty() {
            return;
        }
        info!(count = files.len(), "Replaying dead-letter files");

        for path in files {
            let records = match self.deadletter.read(&path).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable dead-letter file, skipping");
                    continue;
                }
            };
            match self.write_batch(&records, false).await {
                WriteOutcome::Written => {
                    if let Err(e) = self.deadletter.remove(&path).await {
                        warn!(path = %path.display(), error = %e, "Could not delete replayed file");
                    }
                }
                _ => {
                    warn!(path = %path.display(), "Dead-letter replay failed, keeping file");
                    return;
                }
            }
        }
    }

    /// Post-shutdown drain: keep writing until the deadline, then report
    /// whatever is left as dropped.
    async fn drain(&mut self) {
        let deadline = Instant::now() + self.drain_timeout;
        let mut batch = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.rx.recv()).await {
                Ok(Some(record)) => {
                    batch.push(record);
                    if batch.len() >= self.batch_size {
                        self.write_batch(&batch, true).await;
                        batch.clear();
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
        if !batch.is_empty() {
            self.write_batch(&batch, true).await;
        }

        self.rx.close();
        let mut dropped = 0u64;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Unflushed records dropped at shutdown");
        }
    }
}

/// Fill a batch starting from `first`: up to `max` records, or whatever
/// arrived when the flush window closes.
async fn fill_batch(
    rx: &mut mpsc::Receiver<CaptureRecord>,
    first: CaptureRecord,
    max: usize,
    window: Duration,
) -> Vec<CaptureRecord> {
    let mut batch = Vec::with_capacity(max.min(1024));
    batch.push(first);
    let deadline = Instant::now() + window;

    while batch.len() < max {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(record)) => batch.push(record),
            Ok(None) => break,
            Err(_) => break,
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(n: u32) -> CaptureRecord {
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
    }

    #[tokio::test]
    async fn batch_caps_at_max() {
        let (tx, mut rx) = mpsc::channel(64);
        for n in 1..10 {
            tx.send(record(n)).await.unwrap();
        }
        let batch = fill_batch(&mut rx, record(0), 4, Duration::from_secs(5)).await;
        assert_eq!(batch.len(), 4);
        assert_eq!(batch[0].pixel, "px0");
        assert_eq!(batch[3].pixel, "px3");
    }

    #[tokio::test]
    async fn idle_channel_flushes_early() {
        let (tx, mut rx) = mpsc::channel::<CaptureRecord>(4);
        let start = Instant::now();
        let batch = fill_batch(&mut rx, record(0), 100, Duration::from_millis(50)).await;
        assert_eq!(batch.len(), 1);
        assert!(start.elapsed() < Duration::from_secs(2));
        drop(tx);
    }

    #[tokio::test]
    async fn closed_channel_ends_the_batch() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(record(1)).await.unwrap();
        drop(tx);
        let batch = fill_batch(&mut rx, record(0), 100, Duration::from_secs(5)).await;
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn batch_preserves_enqueue_order() {
        let (tx, mut rx) = mpsc::channel(64);
        for n in 1..5 {
            tx.send(record(n)).await.unwrap();
        }
        let batch = fill_batch(&mut rx, record(0), 10, Duration::from_millis(50)).await;
        let pixels: Vec<&str> = batch.iter().map(|r| r.pixel.as_str()).collect();
        assert_eq!(pixels, ["px0", "px1", "px2", "px3", "px4"]);
    }
}
