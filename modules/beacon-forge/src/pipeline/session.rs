//! Session stitching.
//!
//! A session key is the composite of company, fingerprint, address, and UA.
//! Hits inside the inactivity timeout continue the session; the appended
//! token is the hit's sequence number within it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{Enricher, EnrichmentContext, SignalSnapshot};

struct SessionState {
    last_seen: DateTime<Utc>,
    hits: u64,
}

pub struct SessionEnricher {
    sessions: Mutex<HashMap<u64, SessionState>>,
    timeout: Duration,
}

impl SessionEnricher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout: Duration::seconds(timeout_secs.max(1) as i64),
        }
    }

    pub fn observe(&self, key: u64, now: DateTime<Utc>) -> u64 {
        let mut sessions = self.sessions.lock().expect("session state poisoned");
        let state = sessions.entry(key).or_insert(SessionState {
            last_seen: now,
            hits: 0,
        });
        if now - state.last_seen > self.timeout {
            state.hits = 0;
        }
        state.hits += 1;
        state.last_seen = now;
        state.hits
    }

    pub fn sweep(&self, now: DateTime<Utc>) {
        let mut sessions = self.sessions.lock().expect("session state poisoned");
        sessions.retain(|_, s| now - s.last_seen <= self.timeout);
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().expect("session state poisoned").len()
    }
}

fn session_key(company: &str, fingerprint: &str, ip: &str, ua: &str) -> u64 {
    let mut composite = String::with_capacity(
        company.len() + fingerprint.len() + ip.len() + ua.len() + 3,
    );
    composite.push_str(company);
    composite.push('\x1f');
    composite.push_str(fingerprint);
    composite.push('\x1f');
    composite.push_str(ip);
    composite.push('\x1f');
    composite.push_str(ua);
    fxhash::hash64(composite.as_bytes())
}

#[async_trait]
impl Enricher for SessionEnricher {
    fn name(&self) -> &'static str {
        "session-stitching"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        let key = session_key(
            &ctx.record.company,
            snap.fingerprint.as_deref().unwrap_or(""),
            &ctx.record.ip,
            &snap.ua,
        );
        let hit = self.observe(key, ctx.record.received_at);
        ctx.append("sessionHit", &hit.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_increment_within_timeout() {
        let enricher = SessionEnricher::new(600);
        let now = Utc::now();
        assert_eq!(enricher.observe(7, now), 1);
        assert_eq!(enricher.observe(7, now + Duration::seconds(60)), 2);
        assert_eq!(enricher.observe(7, now + Duration::seconds(120)), 3);
    }

    #[test]
    fn inactivity_starts_a_new_session() {
        let enricher = SessionEnricher::new(600);
        let now = Utc::now();
        enricher.observe(7, now);
        enricher.observe(7, now + Duration::seconds(30));
        assert_eq!(enricher.observe(7, now + Duration::seconds(700)), 1);
    }

    #[test]
    fn distinct_keys_are_distinct_sessions() {
        let enricher = SessionEnricher::new(600);
        let now = Utc::now();
        assert_eq!(enricher.observe(1, now), 1);
        assert_eq!(enricher.observe(2, now), 1);
        assert_ne!(
            session_key("acme", "fp", "1.1.1.1", "ua"),
            session_key("globex", "fp", "1.1.1.1", "ua")
        );
    }

    #[test]
    fn sweep_evicts_timed_out_sessions() {
        let enricher = SessionEnricher::new(600);
        let now = Utc::now();
        enricher.observe(7, now);
        enricher.sweep(now + Duration::seconds(601));
        assert_eq!(enricher.active_sessions(), 0);
    }
}
