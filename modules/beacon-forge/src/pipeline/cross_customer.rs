//! Cross-customer intelligence: how many distinct companies one device
//! fingerprint has hit inside the sliding window. A device showing up
//! across many unrelated customers is usually a crawler.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{Enricher, EnrichmentContext, SignalSnapshot};

pub struct CrossCustomerEnricher {
    inner: Mutex<HashMap<u64, HashMap<String, DateTime<Utc>>>>,
    window: Duration,
}

impl CrossCustomerEnricher {
    pub fn new(window_secs: u64) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            window: Duration::seconds(window_secs.max(60) as i64),
        }
    }

    pub fn observe(&self, fp_hash: u64, company: &str, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let mut map = self.inner.lock().expect("cross-customer state poisoned");
        let companies = map.entry(fp_hash).or_default();
        companies.retain(|_, last| *last > cutoff);
        companies.insert(company.to_string(), now);
        companies.len()
    }

    pub fn sweep(&self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        let mut map = self.inner.lock().expect("cross-customer state poisoned");
        map.retain(|_, companies| {
            companies.retain(|_, last| *last > cutoff);
            !companies.is_empty()
        });
    }
}

#[async_trait]
impl Enricher for CrossCustomerEnricher {
    fn name(&self) -> &'static str {
        "cross-customer"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        let Some(fp) = snap.fingerprint.as_deref() else {
            return Ok(());
        };
        let count = self.observe(
            fxhash::hash64(fp.as_bytes()),
            &ctx.record.company,
            ctx.record.received_at,
        );
        ctx.append("crossCustomer", &count.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_distinct_companies_in_window() {
        let enricher = CrossCustomerEnricher::new(3600);
        let now = Utc::now();
        assert_eq!(enricher.observe(1, "acme", now), 1);
        assert_eq!(enricher.observe(1, "acme", now), 1);
        assert_eq!(enricher.observe(1, "globex", now), 2);
        assert_eq!(enricher.observe(2, "acme", now), 1);
    }

    #[test]
    fn window_expiry_forgets_companies() {
        let enricher = CrossCustomerEnricher::new(3600);
        let now = Utc::now();
        enricher.observe(1, "acme", now);
        let later = now + Duration::seconds(3700);
        assert_eq!(enricher.observe(1, "globex", later), 1);
    }

    #[test]
    fn sweep_drops_empty_devices() {
        let enricher = CrossCustomerEnricher::new(60);
        let now = Utc::now();
        enricher.observe(1, "acme", now);
        enricher.sweep(now + Duration::seconds(120));
        assert!(enricher.inner.lock().unwrap().is_empty());
    }
}
