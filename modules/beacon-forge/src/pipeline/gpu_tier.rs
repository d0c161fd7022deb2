//! GPU renderer classification.
//!
//! Two parallel ordered tables over the WebGL renderer string: substring →
//! affluence tier, and substring → release year (used by device-age
//! estimation). First match wins in both, so longer and more specific
//! patterns sit first — in particular the workstation families whose names
//! contain consumer tokens ("Quadro RTX 4000" must not classify as an
//! "RTX 40" consumer card).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::{Enricher, EnrichmentContext, SignalSnapshot};

const DEFAULT_TABLES: &str = include_str!("../../data/gpu_tables.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuTier {
    High,
    Mid,
    Low,
    Unknown,
}

impl GpuTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuTier::High => "HIGH",
            GpuTier::Mid => "MID",
            GpuTier::Low => "LOW",
            GpuTier::Unknown => "Unknown",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "HIGH" => GpuTier::High,
            "MID" => GpuTier::Mid,
            "LOW" => GpuTier::Low,
            _ => GpuTier::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TableFile {
    tiers: Vec<(String, String)>,
    years: Vec<(String, u16)>,
}

pub struct GpuTables {
    tiers: Vec<(String, GpuTier)>,
    years: Vec<(String, u16)>,
}

impl GpuTables {
    pub fn load(override_path: Option<&Path>) -> Self {
        let json = override_path
            .and_then(|p| match std::fs::read_to_string(p) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "Falling back to built-in GPU tables");
                    None
                }
            })
            .unwrap_or_else(|| DEFAULT_TABLES.to_string());

        let file: TableFile = serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!(error = %e, "GPU table parse failed, using built-ins");
            serde_json::from_str(DEFAULT_TABLES).expect("built-in GPU tables parse")
        });

        Self {
            tiers: file
                .tiers
                .into_iter()
                .map(|(pattern, tier)| (pattern.to_ascii_lowercase(), GpuTier::parse(&tier)))
                .collect(),
            years: file
                .years
                .into_iter()
                .map(|(pattern, year)| (pattern.to_ascii_lowercase(), year))
                .collect(),
        }
    }

    /// Tier of the first (declared-order) pattern that is a
    /// case-insensitive substring of the renderer string.
    pub fn tier(&self, renderer: &str) -> GpuTier {
        let renderer = renderer.to_ascii_lowercase();
        self.tiers
            .iter()
            .find(|(pattern, _)| renderer.contains(pattern))
            .map(|(_, tier)| *tier)
            .unwrap_or(GpuTier::Unknown)
    }

    /// Release year by the same first-match rule.
    pub fn release_year(&self, renderer: &str) -> Option<u16> {
        let renderer = renderer.to_ascii_lowercase();
        self.years
            .iter()
            .find(|(pattern, _)| renderer.contains(pattern))
            .map(|(_, year)| *year)
    }
}

pub struct GpuTierEnricher {
    tables: Arc<GpuTables>,
}

impl GpuTierEnricher {
    pub fn new(tables: Arc<GpuTables>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl Enricher for GpuTierEnricher {
    fn name(&self) -> &'static str {
        "device-affluence"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        let Some(gpu) = snap.gpu.as_deref() else {
            return Ok(());
        };
        let tier = self.tables.tier(gpu);
        if tier != GpuTier::Unknown {
            ctx.append("gpuTier", tier.as_str());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> GpuTables {
        GpuTables::load(None)
    }

    #[test]
    fn first_match_wins_in_declared_order() {
        let t = tables();
        // The workstation family contains the consumer token "RTX" and must
        // resolve ahead of it.
        assert_eq!(
            t.tier("NVIDIA Quadro RTX 4000 (TU104)"),
            GpuTier::Mid
        );
        assert_eq!(t.tier("ANGLE (NVIDIA GeForce RTX 4070)"), GpuTier::High);
    }

    #[test]
    fn tiers_match_case_insensitively() {
        let t = tables();
        assert_eq!(t.tier("angle (nvidia geforce rtx 3090 direct3d11)"), GpuTier::High);
        assert_eq!(t.tier("Intel(R) UHD Graphics 630"), GpuTier::Low);
        assert_eq!(t.tier("Apple M2 Pro"), GpuTier::High);
        assert_eq!(t.tier("Google SwiftShader"), GpuTier::Low);
    }

    #[test]
    fn unknown_gpu_contributes_nothing() {
        assert_eq!(tables().tier("Totally Novel GPU 9000"), GpuTier::Unknown);
    }

    #[test]
    fn release_years_follow_first_match() {
        let t = tables();
        assert_eq!(t.release_year("NVIDIA GeForce RTX 3090"), Some(2020));
        assert_eq!(t.release_year("Apple M1 Max"), Some(2020));
        assert_eq!(t.release_year("Mystery Renderer"), None);
    }
}
