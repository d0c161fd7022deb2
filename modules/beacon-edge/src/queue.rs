//! Bounded multi-producer single-consumer capture queue.
//!
//! The enqueue path never suspends: producers take a short mutex, evict the
//! oldest record when full, and return. The single pipe-writer task is woken
//! through a `Notify`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use beacon_common::CaptureRecord;

pub struct CaptureQueue {
    inner: Mutex<VecDeque<CaptureRecord>>,
    capacity: usize,
    depth: AtomicUsize,
    dropped: AtomicU64,
    notify: Notify,
}

impl CaptureQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            depth: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue a record. The newest record is always admitted; on a full
    /// queue the oldest is dropped and counted.
    pub fn push(&self, record: CaptureRecord) {
        {
            let mut q = self.inner.lock().expect("capture queue poisoned");
            if q.len() >= self.capacity {
                q.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(record);
            self.depth.store(q.len(), Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    /// Drain up to `max` records for the writer. Returns an empty vec when
    /// the queue is empty.
    pub fn drain(&self, max: usize) -> Vec<CaptureRecord> {
        let mut q = self.inner.lock().expect("capture queue poisoned");
        let take = q.len().min(max);
        let batch: Vec<CaptureRecord> = q.drain(..take).collect();
        self.depth.store(q.len(), Ordering::Relaxed);
        batch
    }

    /// Wait until at least one record is queued. Returns immediately when
    /// records are already present.
    pub async fn wait_nonempty(&self) {
        loop {
            if self.depth.load(Ordering::Relaxed) > 0 {
                return;
            }
            self.notify.notified().await;
        }
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
