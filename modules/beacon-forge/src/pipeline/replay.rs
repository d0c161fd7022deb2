//! Behavioral replay detection.
//!
//! The mouse path is quantized (10 px grid, 250 ms steps) and hashed. The
//! same path arriving under a different fingerprint means a recorded human
//! session is being replayed by automation. Entries idle for an hour are
//! swept.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{Enricher, EnrichmentContext, SignalSnapshot};

const GRID_PX: i64 = 10;
const TIME_STEP_MS: i64 = 250;

struct ReplayEntry {
    first_fingerprint: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    replay_count: u64,
}

pub struct ReplayTracker {
    inner: Mutex<HashMap<u64, ReplayEntry>>,
    idle: Duration,
}

pub struct ReplayHit {
    pub first_fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub replay_count: u64,
}

/// Quantize a `x,y,t|x,y,t|…` path so minor jitter maps to the same hash.
pub fn quantize_path(path: &str) -> Option<u64> {
    let mut quantized = String::with_capacity(path.len());
    let mut points = 0;
    for point in path.split('|') {
        let mut parts = point.split(',');
        let x: i64 = parts.next()?.trim().parse().ok()?;
        let y: i64 = parts.next()?.trim().parse().ok()?;
        let t: i64 = parts.next()?.trim().parse().ok()?;
        quantized.push_str(&(x / GRID_PX).to_string());
        quantized.push(':');
        quantized.push_str(&(y / GRID_PX).to_string());
        quantized.push(':');
        quantized.push_str(&(t / TIME_STEP_MS).to_string());
        quantized.push(';');
        points += 1;
    }
    // A path with a single point carries no behavior worth hashing.
    if points < 2 {
        return None;
    }
    Some(fxhash::hash64(quantized.as_bytes()))
}

impl ReplayTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            idle: Duration::hours(1),
        }
    }

    /// Record one sighting of a path hash. Returns a hit when the path was
    /// first seen under a different fingerprint.
    pub fn observe(
        &self,
        path_hash: u64,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Option<ReplayHit> {
        let mut map = self.inner.lock().expect("replay cache poisoned");
        match map.get_mut(&path_hash) {
            None => {
                map.insert(
                    path_hash,
                    ReplayEntry {
                        first_fingerprint: fingerprint.to_string(),
                        first_seen: now,
                        last_seen: now,
                        replay_count: 0,
                    },
                );
                None
            }
            Some(entry) => {
                entry.last_seen = now;
                if entry.first_fingerprint == fingerprint {
                    return None;
                }
                entry.replay_count += 1;
                Some(ReplayHit {
                    first_fingerprint: entry.first_fingerprint.clone(),
                    first_seen: entry.first_seen,
                    replay_count: entry.replay_count,
                })
            }
        }
    }

    pub fn sweep(&self, now: DateTime<Utc>) {
        let mut map = self.inner.lock().expect("replay cache poisoned");
        map.retain(|_, entry| now - entry.last_seen <= self.idle);
    }

    pub fn tracked_paths(&self) -> usize {
        self.inner.lock().expect("replay cache poisoned").len()
    }

    #[cfg(test)]
    fn first_seen(&self, path_hash: u64) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .unwrap()
            .get(&path_hash)
            .map(|e| e.first_seen)
    }
}

impl Default for ReplayTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReplayEnricher {
    tracker: std::sync::Arc<ReplayTracker>,
}

impl ReplayEnricher {
    pub fn new(tracker: std::sync::Arc<ReplayTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Enricher for ReplayEnricher {
    fn name(&self) -> &'static str {
        "behavioral-replay"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        let Some(path) = snap.mouse_path.as_deref() else {
            return Ok(());
        };
        let Some(hash) = quantize_path(path) else {
            return Ok(());
        };
        // Identity prefers the canvas print: replay kits reuse the mouse
        // recording but regenerate the rest of the fingerprint.
        let fingerprint = snap
            .canvas
            .as_deref()
            .or(snap.fingerprint.as_deref())
            .unwrap_or("");
        if fingerprint.is_empty() {
            return Ok(());
        }

        if let Some(hit) = self
            .tracker
            .observe(hash, fingerprint, ctx.record.received_at)
        {
            tracing::debug!(
                first_seen = %hit.first_seen,
                count = hit.replay_count,
                "Replayed mouse path detected"
            );
            ctx.append("replay", "1");
            ctx.append("replayFP", &hit.first_fingerprint);
            ctx.append("replayCount", &hit.replay_count.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_quantizes_to_the_same_hash() {
        let a = quantize_path("10,10,0|20,20,100|30,30,200").unwrap();
        let b = quantize_path("12,11,40|22,24,120|33,38,210").unwrap();
        assert_eq!(a, b);

        let c = quantize_path("100,100,0|200,200,1000").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn single_point_paths_are_ignored() {
        assert!(quantize_path("10,10,0").is_none());
        assert!(quantize_path("").is_none());
        assert!(quantize_path("garbage").is_none());
    }

    #[test]
    fn replay_across_fingerprints_is_flagged() {
        let tracker = ReplayTracker::new();
        let now = Utc::now();
        let hash = quantize_path("10,10,0|20,20,100|30,30,200").unwrap();

        assert!(tracker.observe(hash, "canvas-a", now).is_none());
        // Same fingerprint repeating its own path is not a replay.
        assert!(tracker.observe(hash, "canvas-a", now).is_none());

        let hit = tracker.observe(hash, "canvas-b", now).unwrap();
        assert_eq!(hit.first_fingerprint, "canvas-a");
        assert_eq!(hit.replay_count, 1);

        let hit = tracker.observe(hash, "canvas-c", now).unwrap();
        assert_eq!(hit.replay_count, 2);
    }

    #[test]
    fn sweep_evicts_idle_paths_and_keeps_first_seen() {
        let tracker = ReplayTracker::new();
        let start = Utc::now();
        let hash = quantize_path("10,10,0|20,20,100").unwrap();

        tracker.observe(hash, "a", start);
        tracker.observe(hash, "b", start + Duration::minutes(30));
        assert_eq!(tracker.first_seen(hash), Some(start));

        tracker.sweep(start + Duration::minutes(45));
        assert_eq!(tracker.tracked_paths(), 1);

        tracker.sweep(start + Duration::minutes(95));
        assert_eq!(tracker.tracked_paths(), 0);
    }
}
