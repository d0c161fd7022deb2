//! Circuit breaker around the warehouse writer.
//!
//! `Closed → Open → HalfOpen → Closed/Open`. Storage-full errors trip the
//! circuit immediately with a distinctive reason; five consecutive other
//! (non-deadlock) errors trip it generically. While open, the writer sleeps
//! a doubling backoff; after the cooldown the next check admits exactly one
//! probe batch.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use beacon_warehouse::SqlErrorClass;

const CONSECUTIVE_TRIP_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// What the writer should do right now.
#[derive(Debug, PartialEq, Eq)]
pub enum Gate {
    /// Circuit closed; write normally.
    Proceed,
    /// Cooldown elapsed; this caller owns the single probe batch.
    Probe,
    /// Circuit open; sleep this long and check again.
    Wait(Duration),
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    backoff: Duration,
    trip_reason: Option<String>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    max_backoff: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub trip_reason: Option<String>,
}

impl CircuitBreaker {
    pub fn new(cooldown_secs: u64, max_backoff_secs: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                backoff: Duration::from_secs(1),
                trip_reason: None,
                probe_in_flight: false,
            }),
            cooldown: Duration::from_secs(cooldown_secs.max(1)),
            max_backoff: Duration::from_secs(max_backoff_secs.max(1)),
        }
    }

    pub fn check(&self) -> Gate {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> Gate {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        match inner.state {
            BreakerState::Closed => Gate::Proceed,
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    // A probe is already in flight; hold further batches.
                    Gate::Wait(Duration::from_secs(1))
                } else {
                    // The previous probe died as a deadlock victim; admit
                    // the next one.
                    inner.probe_in_flight = true;
                    Gate::Probe
                }
            }
            BreakerState::Open => {
                let opened = inner.opened_at.unwrap_or(now);
                if now.duration_since(opened) >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!("Circuit half-open, admitting probe batch");
                    Gate::Probe
                } else {
                    let wait = inner.backoff;
                    inner.backoff = (inner.backoff * 2).min(self.max_backoff);
                    Gate::Wait(wait)
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        if inner.state != BreakerState::Closed {
            info!("Circuit closed after successful write");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.backoff = Duration::from_secs(1);
        inner.trip_reason = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self, class: SqlErrorClass, detail: &str) {
        self.record_failure_at(class, detail, Instant::now());
    }

    fn record_failure_at(&self, class: SqlErrorClass, detail: &str, now: Instant) {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        inner.probe_in_flight = false;
        match class {
            SqlErrorClass::Deadlock => {
                // Deadlock victims retry without advancing the trip counter.
            }
            SqlErrorClass::StorageFull => {
                trip(&mut inner, now, format!("warehouse storage full: {detail}"));
            }
            SqlErrorClass::Transient => {
                if inner.state == BreakerState::HalfOpen {
                    // Failed probe: straight back to open.
                    trip(&mut inner, now, format!("probe failed: {detail}"));
                    return;
                }
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= CONSECUTIVE_TRIP_THRESHOLD {
                    let failures = inner.consecutive_failures;
                    trip(
                        &mut inner,
                        now,
                        format!("{failures} consecutive write failures: {detail}"),
                    );
                }
            }
        }
    }

    /// Operator-facing reset: force the circuit closed.
    pub fn reset(&self) {
        warn!("Circuit breaker manually reset");
        self.record_success();
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker state poisoned").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker state poisoned");
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            trip_reason: inner.trip_reason.clone(),
        }
    }
}

fn trip(inner: &mut Inner, now: Instant, reason: String) {
    if inner.state != BreakerState::Open {
        warn!(reason = %reason, "Circuit breaker tripped");
    }
    inner.state = BreakerState::Open;
    inner.opened_at = Some(now);
    inner.backoff = Duration::from_secs(1);
    inner.trip_reason = Some(reason);
    inner.probe_in_flight = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(120, 30)
    }

    #[test]
    fn five_consecutive_failures_open_the_circuit() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure(SqlErrorClass::Transient, "timeout");
            assert_eq!(b.state(), BreakerState::Closed);
        }
        b.record_failure(SqlErrorClass::Transient, "timeout");
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b
            .snapshot()
            .trip_reason
            .unwrap()
            .contains("5 consecutive"));
    }

    #[test]
    fn deadlocks_do_not_advance_the_counter() {
        let b = breaker();
        for _ in 0..10 {
            b.record_failure(SqlErrorClass::Deadlock, "deadlock victim");
        }
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn storage_full_trips_immediately_with_distinct_reason() {
        let b = breaker();
        b.record_failure(SqlErrorClass::StorageFull, "disk full");
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.snapshot().trip_reason.unwrap().contains("storage full"));
    }

    #[test]
    fn open_waits_with_doubling_backoff_capped() {
        let b = breaker();
        let start = Instant::now();
        b.record_failure_at(SqlErrorClass::StorageFull, "disk full", start);

        let mut waits = Vec::new();
        for _ in 0..7 {
            match b.check_at(start + Duration::from_secs(1)) {
                Gate::Wait(d) => waits.push(d.as_secs()),
                other => panic!("expected wait, got {other:?}"),
            }
        }
        assert_eq!(waits, [1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn cooldown_admits_one_probe_then_closes_on_success() {
        let b = breaker();
        let start = Instant::now();
        b.record_failure_at(SqlErrorClass::StorageFull, "disk full", start);

        let after = start + Duration::from_secs(121);
        assert_eq!(b.check_at(after), Gate::Probe);
        // Second caller during the probe must wait.
        assert!(matches!(b.check_at(after), Gate::Wait(_)));

        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.check(), Gate::Proceed);
    }

    #[test]
    fn failed_probe_reopens() {
        let b = breaker();
        let start = Instant::now();
        b.record_failure_at(SqlErrorClass::StorageFull, "disk full", start);
        assert_eq!(b.check_at(start + Duration::from_secs(121)), Gate::Probe);

        b.record_failure_at(
            SqlErrorClass::Transient,
            "still broken",
            start + Duration::from_secs(122),
        );
        assert_eq!(b.state(), BreakerState::Open);
        // The cooldown restarts from the failed probe.
        assert!(matches!(
            b.check_at(start + Duration::from_secs(123)),
            Gate::Wait(_)
        ));
    }

    #[test]
    fn deadlocked_probe_admits_another() {
        let b = breaker();
        let start = Instant::now();
        b.record_failure_at(SqlErrorClass::StorageFull, "disk full", start);

        let after = start + Duration::from_secs(121);
        assert_eq!(b.check_at(after), Gate::Probe);
        b.record_failure_at(SqlErrorClass::Deadlock, "deadlock victim", after);

        // The deadlock neither closed nor reopened the circuit; the next
        // check gets the probe slot.
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert_eq!(b.check_at(after + Duration::from_secs(1)), Gate::Probe);
    }

    #[test]
    fn manual_reset_closes_from_any_state() {
        let b = breaker();
        b.record_failure(SqlErrorClass::StorageFull, "disk full");
        assert_eq!(b.state(), BreakerState::Open);
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
