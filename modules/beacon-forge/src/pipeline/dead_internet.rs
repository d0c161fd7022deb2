//! Dead-internet index: the bot share of each customer's traffic over a
//! sliding 24-hour window, kept as hourly counters.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Enricher, EnrichmentContext, SignalSnapshot};

const WINDOW_HOURS: i64 = 24;

struct HourBucket {
    hour: i64,
    bots: u64,
    total: u64,
}

pub struct DeadInternetIndex {
    inner: Mutex<HashMap<String, VecDeque<HourBucket>>>,
}

impl DeadInternetIndex {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record one hit and return the company's current bot percentage.
    pub fn observe(&self, company: &str, is_bot: bool, now: DateTime<Utc>) -> u32 {
        let hour = now.timestamp() / 3600;
        let cutoff = hour - WINDOW_HOURS;
        let mut map = self.inner.lock().expect("dead-internet state poisoned");
        let buckets = map.entry(company.to_string()).or_default();

        while buckets.front().is_some_and(|b| b.hour <= cutoff) {
            buckets.pop_front();
        }
        match buckets.back_mut() {
            Some(bucket) if bucket.hour == hour => {
                bucket.total += 1;
                if is_bot {
                    bucket.bots += 1;
                }
            }
            _ => buckets.push_back(HourBucket {
                hour,
                bots: is_bot as u64,
                total: 1,
            }),
        }

        let (bots, total) = buckets
            .iter()
            .fold((0u64, 0u64), |(b, t), bucket| (b + bucket.bots, t + bucket.total));
        ((bots * 100) / total.max(1)) as u32
    }

    pub fn sweep(&self, now: DateTime<Utc>) {
        let cutoff = now.timestamp() / 3600 - WINDOW_HOURS;
        let mut map = self.inner.lock().expect("dead-internet state poisoned");
        map.retain(|_, buckets| {
            while buckets.front().is_some_and(|b| b.hour <= cutoff) {
                buckets.pop_front();
            }
            !buckets.is_empty()
        });
    }
}

impl Default for DeadInternetIndex {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DeadInternetEnricher {
    index: std::sync::Arc<DeadInternetIndex>,
}

impl DeadInternetEnricher {
    pub fn new(index: std::sync::Arc<DeadInternetIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Enricher for DeadInternetEnricher {
    fn name(&self) -> &'static str {
        "dead-internet"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        // "Bot" here is the chain's own verdict so far: a known crawler UA
        // or an admitted webdriver.
        let is_bot = ctx.appended("knownBot").is_some() || snap.webdriver == Some(true);
        let percent = self
            .index
            .observe(&ctx.record.company, is_bot, ctx.record.received_at);
        ctx.append("deadInternet", &percent.to_string());
        Ok(())
    }
}
