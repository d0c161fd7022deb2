//! The enrichment pipeline.
//!
//! Records pass one at a time through a fixed chain of classifiers. Each
//! classifier appends zero or more `_srv_*` tokens; a failure in one is
//! logged at debug level and the record continues. Every classifier reads
//! the same [`SignalSnapshot`], built once at pipeline entry.

pub mod arbitrage;
pub mod bot_ua;
pub mod contradiction;
pub mod cross_customer;
pub mod dead_internet;
pub mod device_age;
pub mod gpu_tier;
pub mod ip_api;
pub mod lead_score;
pub mod maxmind;
pub mod rdns;
pub mod replay;
pub mod session;
pub mod snapshot;
pub mod ua_parser;
pub mod whois;

use async_trait::async_trait;
use tracing::debug;

use beacon_common::query::SrvTokens;
use beacon_common::CaptureRecord;

pub use snapshot::{PlatformFamily, SignalSnapshot};

/// One record mid-enrichment: the capture itself plus the append buffer the
/// classifiers write into. The buffer folds back into the query string when
/// the pass finishes.
pub struct EnrichmentContext {
    pub record: CaptureRecord,
    tokens: SrvTokens,
}

impl EnrichmentContext {
    pub fn new(record: CaptureRecord) -> Self {
        Self {
            record,
            tokens: SrvTokens::new(),
        }
    }

    /// Append a `_srv_*` token. Empty values are dropped.
    pub fn append(&mut self, name: &str, value: &str) {
        self.tokens.append(name, value);
    }

    /// Read a token appended earlier in this pass.
    pub fn appended(&self, name: &str) -> Option<String> {
        self.tokens.get(name)
    }

    /// Fold the append buffer into the record's query string.
    pub fn finish(self) -> CaptureRecord {
        let query = self.tokens.merge_into(&self.record.query);
        self.record.with_query(query)
    }
}

#[async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()>;
}

// Stateful enrichers are shared with the background sweep task through an
// Arc; the pipeline treats the handle as the enricher itself.
#[async_trait]
impl<T> Enricher for std::sync::Arc<T>
where
    T: Enricher + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        (**self).enrich(ctx, snap).await
    }
}

pub struct Pipeline {
    enrichers: Vec<Box<dyn Enricher>>,
}

impl Pipeline {
    pub fn new(enrichers: Vec<Box<dyn Enricher>>) -> Self {
        Self { enrichers }
    }

    /// Run one record through the whole chain and return it with the
    /// appended tokens merged in.
    pub async fn run(&self, record: CaptureRecord) -> CaptureRecord {
        let snap = SignalSnapshot::from_record(&record);
        let mut ctx = EnrichmentContext::new(record);

        for enricher in &self.enrichers {
            if let Err(e) = enricher.enrich(&mut ctx, &snap).await {
                debug!(enricher = enricher.name(), error = %e, "Enricher failed, record continues");
            }
        }

        ctx.finish()
    }

    pub fn len(&self) -> usize {
        self.enrichers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enrichers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(query: &str) -> CaptureRecord {
        CaptureRecord {
            company: "co".into(),
            pixel: "px".into(),
            ip: "8.8.8.8".into(),
            path: "/co/px_SMART.GIF".into(),
            query: query.into(),
            headers: "{}".into(),
            ua: String::new(),
            referer: String::new(),
            received_at: Utc::now(),
        }
    }

    struct Appender;

    #[async_trait]
    impl Enricher for Appender {
        fn name(&self) -> &'static str {
            "appender"
        }

        async fn enrich(
            &self,
            ctx: &mut EnrichmentContext,
            _snap: &SignalSnapshot,
        ) -> anyhow::Result<()> {
            ctx.append("first", "yes");
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Enricher for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn enrich(
            &self,
            _ctx: &mut EnrichmentContext,
            _snap: &SignalSnapshot,
        ) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct ReadsPrior;

    #[async_trait]
    impl Enricher for ReadsPrior {
        fn name(&self) -> &'static str {
            "reads-prior"
        }

        async fn enrich(
            &self,
            ctx: &mut EnrichmentContext,
            _snap: &SignalSnapshot,
        ) -> anyhow::Result<()> {
            if ctx.appended("first").as_deref() == Some("yes") {
                ctx.append("second", "confirmed");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_chain() {
        let pipeline = Pipeline::new(vec![
            Box::new(Appender),
            Box::new(Failing),
            Box::new(ReadsPrior),
        ]);
        let out = pipeline.run(record("sw=1920")).await;
        assert!(out.query.contains("_srv_first=yes"));
        assert!(out.query.contains("_srv_second=confirmed"));
    }

    #[tokio::test]
    async fn tokens_merge_onto_original_query() {
        let pipeline = Pipeline::new(vec![Box::new(Appender)]);
        let out = pipeline.run(record("sw=1920&sh=1080")).await;
        assert_eq!(out.query, "sw=1920&sh=1080&_srv_first=yes");
    }
}
