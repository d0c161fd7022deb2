//! Lead-quality scoring: a weighted sum of positive human signals, capped
//! at 100. Runs last so it can read every earlier classifier's verdict.

use async_trait::async_trait;

use super::{Enricher, EnrichmentContext, SignalSnapshot};

const HIGH_THRESHOLD: u32 = 75;
const MID_THRESHOLD: u32 = 40;

pub struct LeadScoreEnricher;

#[derive(Debug, PartialEq, Eq)]
pub enum LeadBucket {
    High,
    Mid,
    Low,
}

pub fn bucket(score: u32) -> LeadBucket {
    if score >= HIGH_THRESHOLD {
        LeadBucket::High
    } else if score >= MID_THRESHOLD {
        LeadBucket::Mid
    } else {
        LeadBucket::Low
    }
}

fn compute(ctx: &EnrichmentContext, snap: &SignalSnapshot) -> u32 {
    let mut score = 0u32;

    // Residential address: public, not a datacenter, not a known proxy.
    if snap.is_public_ip()
        && snap.datacenter.is_none()
        && ctx.appended("ipapiProxy").is_none()
        && ctx.appended("rdnsCloud").is_none()
    {
        score += 15;
    }
    if snap.fp_stability.as_deref() == Some("ok") {
        score += 12;
    }
    if snap.mouse_entropy.is_some_and(|e| e > 2.0) {
        score += 12;
    }
    if snap.effective_font_count() >= 3 {
        score += 10;
    }
    if snap
        .canvas
        .as_deref()
        .is_some_and(|c| !c.is_empty() && c != "blocked")
    {
        score += 8;
    }
    if ctx.appended("tzMatch").as_deref() == Some("1") {
        score += 8;
    }
    if ctx
        .appended("sessionHit")
        .and_then(|h| h.parse::<u64>().ok())
        .is_some_and(|h| h >= 2)
    {
        score += 10;
    }
    if ctx.appended("knownBot").is_none() {
        score += 15;
    }
    if ctx
        .appended("contradictions")
        .map_or(true, |c| c == "0")
    {
        score += 10;
    }

    score.min(100)
}

#[async_trait]
impl Enricher for LeadScoreEnricher {
    fn name(&self) -> &'static str {
        "lead-score"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        let score = compute(ctx, snap);
        ctx.append("leadScore", &score.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::CaptureRecord;
    use chrono::Utc;

    fn context(query: &str) -> (EnrichmentContext, SignalSnapshot) {
        let record = CaptureRecord {
            company: "co".into(),
            pixel: "px".into(),
            ip: "8.8.8.8".into(),
            path: "/p_SMART.GIF".into(),
            query: query.into(),
            headers: "{}".into(),
            ua: String::new(),
            referer: String::new(),
            received_at: Utc::now(),
        };
        let snap = SignalSnapshot::from_record(&record);
        (EnrichmentContext::new(record), snap)
    }

    #[test]
    fn strong_human_signals_score_high() {
        let (mut ctx, snap) = context(
            "me=2.8&fonts=Arial,Georgia,Verdana&canvas=ab12cd&_srv_ipType=Public&_srv_fpStability=ok",
        );
        ctx.append("tzMatch", "1");
        ctx.append("sessionHit", "3");
        ctx.append("contradictions", "0");
        let score = compute(&ctx, &snap);
        assert_eq!(score, 100);
        assert_eq!(bucket(score), LeadBucket::High);
    }

    #[test]
    fn bot_traits_score_low() {
        let (mut ctx, snap) = context("_srv_ipType=Public&_srv_datacenter=aws");
        ctx.append("knownBot", "headless");
        ctx.append("contradictions", "4");
        // Remaining credit: nothing qualifies.
        assert_eq!(bucket(compute(&ctx, &snap)), LeadBucket::Low);
    }

    #[test]
    fn middling_signals_land_in_mid() {
        let (mut ctx, snap) = context("me=2.5&fonts=Arial,Georgia,Verdana&_srv_ipType=Public");
        ctx.append("contradictions", "1");
        // 15 residential + 12 mouse + 10 fonts + 15 not-bot = 52
        let score = compute(&ctx, &snap);
        assert_eq!(score, 52);
        assert_eq!(bucket(score), LeadBucket::Mid);
    }

    #[test]
    fn missing_contradiction_verdict_counts_as_clean() {
        let (ctx, snap) = context("sw=1920&sh=1080&x=1");
        // not-bot 15 + contradictions 10
        assert_eq!(compute(&ctx, &snap), 25);
    }
}
