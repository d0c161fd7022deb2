//! Per-IP fingerprint stability stats.
//!
//! Two windows per source address: distinct fingerprint hashes over the last
//! 15 minutes, and total observations over 24 hours (kept as hourly buckets
//! so the touch path stays an amortized O(1) increment). Entries evict once
//! both windows are empty.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// How consistent one IP's fingerprints look. A single fingerprint is the
/// normal case; several distinct prints in a short window suggests rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Ok,
    Medium,
    High,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Ok => "ok",
            Stability::Medium => "medium",
            Stability::High => "high",
        }
    }
}

struct IpStats {
    /// (seen-at, fingerprint hash) pairs within the short window.
    recent: VecDeque<(DateTime<Utc>, u64)>,
    /// (hour bucket, count) pairs covering the long window.
    hourly: VecDeque<(i64, u64)>,
}

pub struct StabilityTracker {
    inner: Mutex<HashMap<IpAddr, IpStats>>,
    short_window: Duration,
    long_window: Duration,
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self::with_windows(Duration::minutes(15), Duration::hours(24))
    }

    pub fn with_windows(short_window: Duration, long_window: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            short_window,
            long_window,
        }
    }

    /// Record one observation and classify the IP. Returns the stability
    /// bucket and the 24-hour observation count (including this one).
    pub fn observe(&self, ip: IpAddr, fp_hash: u64, now: DateTime<Utc>) -> (Stability, u64) {
        let mut map = self.inner.lock().expect("stability tracker poisoned");
        let stats = map.entry(ip).or_insert_with(|| IpStats {
            recent: VecDeque::new(),
            hourly: VecDeque::new(),
        });

        let short_cutoff = now - self.short_window;
        while stats.recent.front().is_some_and(|(t, _)| *t < short_cutoff) {
            stats.recent.pop_front();
        }
        stats.recent.push_back((now, fp_hash));

        let hour = now.timestamp() / 3600;
        let hour_cutoff = hour - self.long_window.num_hours();
        while stats.hourly.front().is_some_and(|(h, _)| *h <= hour_cutoff) {
            stats.hourly.pop_front();
        }
        match stats.hourly.back_mut() {
            Some((h, count)) if *h == hour => *count += 1,
            _ => stats.hourly.push_back((hour, 1)),
        }

        let mut distinct: Vec<u64> = stats.recent.iter().map(|(_, h)| *h).collect();
        distinct.sort_unstable();
        distinct.dedup();
        let stability = match distinct.len() {
            0 | 1 => Stability::Ok,
            2 | 3 => Stability::Medium,
            _ => Stability::High,
        };
        let seen: u64 = stats.hourly.iter().map(|(_, c)| c).sum();

        (stability, seen)
    }

    /// Drop IPs whose windows have both emptied. Called from a background
    /// task, not the parse path.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let short_cutoff = now - self.short_window;
        let hour_cutoff = now.timestamp() / 3600 - self.long_window.num_hours();
        let mut map = self.inner.lock().expect("stability tracker poisoned");
        map.retain(|_, stats| {
            while stats.recent.front().is_some_and(|(t, _)| *t < short_cutoff) {
                stats.recent.pop_front();
            }
            while stats.hourly.front().is_some_and(|(h, _)| *h <= hour_cutoff) {
                stats.hourly.pop_front();
            }
            !stats.recent.is_empty() || !stats.hourly.is_empty()
        });
    }

    pub fn tracked_ips(&self) -> usize {
        self.inner.lock().expect("stability tracker poisoned").len()
    }
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}
