//! The contradiction matrix.
//!
//! A static rule table over the signal snapshot. Severities are declared
//! `Impossible` first so the flag list triages naturally. Every rule is
//! evaluated for every record; there is no short-circuit.

use async_trait::async_trait;

use super::{Enricher, EnrichmentContext, PlatformFamily, SignalSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Impossible,
    Improbable,
    Suspicious,
}

pub struct Rule {
    pub name: &'static str,
    pub severity: Severity,
    pub predicate: fn(&SignalSnapshot) -> bool,
}

fn gpu_lower(snap: &SignalSnapshot) -> String {
    snap.gpu.as_deref().unwrap_or("").to_ascii_lowercase()
}

fn is_safari_only(snap: &SignalSnapshot) -> bool {
    let ua = &snap.ua;
    ua.contains("Safari/")
        && !ua.contains("Chrome")
        && !ua.contains("Chromium")
        && !ua.contains("CriOS")
        && !ua.contains("Edg")
        && !ua.contains("OPR")
        && !ua.contains("Android")
}

fn has_apple_marker_fonts(snap: &SignalSnapshot) -> bool {
    const APPLE_FONTS: [&str; 5] = [
        "helvetica neue",
        "menlo",
        "monaco",
        "lucida grande",
        "avenir",
    ];
    snap.fonts.iter().any(|f| {
        let f = f.to_ascii_lowercase();
        APPLE_FONTS.contains(&f.as_str())
    })
}

/// Declared in triage order: Impossible, then Improbable, then Suspicious.
pub const RULES: &[Rule] = &[
    Rule {
        name: "MacDirect3D",
        severity: Severity::Impossible,
        predicate: |snap| {
            matches!(snap.platform_family(), PlatformFamily::MacOs | PlatformFamily::Ios)
                && (gpu_lower(snap).contains("direct3d") || gpu_lower(snap).contains("d3d11"))
        },
    },
    Rule {
        name: "AppleGpuForeignPlatform",
        severity: Severity::Impossible,
        predicate: |snap| {
            let vendor = snap.gpu_vendor.as_deref().unwrap_or("").to_ascii_lowercase();
            vendor.contains("apple")
                && !matches!(
                    snap.platform_family(),
                    PlatformFamily::MacOs | PlatformFamily::Ios
                )
        },
    },
    Rule {
        name: "WindowsSafari",
        severity: Severity::Impossible,
        predicate: |snap| snap.ua.contains("Windows") && is_safari_only(snap),
    },
    Rule {
        name: "AppleFontsOnLinux",
        severity: Severity::Impossible,
        predicate: |snap| {
            snap.platform_family() == PlatformFamily::Linux && has_apple_marker_fonts(snap)
        },
    },
    Rule {
        name: "SafariBatteryApi",
        severity: Severity::Impossible,
        predicate: |snap| is_safari_only(snap) && snap.battery == Some(true),
    },
    Rule {
        name: "TouchPointsWithoutTouch",
        severity: Severity::Improbable,
        predicate: |snap| {
            snap.touch_points.unwrap_or(0) > 0 && snap.touch_support == Some(false)
        },
    },
    Rule {
        name: "MobileWideScreenMouse",
        severity: Severity::Improbable,
        predicate: |snap| {
            snap.is_mobile_ua()
                && snap.screen_w.unwrap_or(0) >= 2560
                && snap.mouse_entropy.unwrap_or(0.0) > 0.0
        },
    },
    Rule {
        name: "MobileWithHover",
        severity: Severity::Improbable,
        predicate: |snap| snap.is_mobile_ua() && snap.hover == Some(true),
    },
    Rule {
        name: "DesktopTinyScreen",
        severity: Severity::Improbable,
        predicate: |snap| {
            !snap.is_mobile_ua()
                && !snap.ua.is_empty()
                && snap.screen_w.is_some_and(|w| w < 600)
        },
    },
    Rule {
        name: "ManyCoresSoftwareGpu",
        severity: Severity::Improbable,
        predicate: |snap| {
            let gpu = gpu_lower(snap);
            snap.cores.unwrap_or(0) >= 16
                && (gpu.contains("swiftshader")
                    || gpu.contains("llvmpipe")
                    || gpu.contains("software")
                    || gpu.contains("virtualbox")
                    || gpu.contains("vmware"))
        },
    },
    Rule {
        name: "IphoneOversizeScreen",
        severity: Severity::Improbable,
        predicate: |snap| {
            snap.platform
                .as_deref()
                .unwrap_or("")
                .to_ascii_lowercase()
                .contains("iphone")
                && snap.screen_w.unwrap_or(0) > 500
        },
    },
    Rule {
        name: "WebdriverWithMouse",
        severity: Severity::Suspicious,
        predicate: |snap| {
            snap.webdriver == Some(true) && snap.mouse_entropy.unwrap_or(0.0) > 2.0
        },
    },
    Rule {
        name: "LowMemoryManyCores",
        severity: Severity::Suspicious,
        predicate: |snap| {
            snap.memory_gb.is_some_and(|m| m <= 0.5) && snap.cores.unwrap_or(0) >= 8
        },
    },
];

pub struct ContradictionEnricher;

/// Evaluate every rule; fired rule names in declared order.
pub fn evaluate(snap: &SignalSnapshot) -> Vec<&'static str> {
    RULES
        .iter()
        .filter(|rule| (rule.predicate)(snap))
        .map(|rule| rule.name)
        .collect()
}

#[async_trait]
impl Enricher for ContradictionEnricher {
    fn name(&self) -> &'static str {
        "contradiction-matrix"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        let fired = evaluate(snap);
        ctx.append("contradictions", &fired.len().to_string());
        if !fired.is_empty() {
            ctx.append("contradictionFlags", &fired.join(","));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::CaptureRecord;
    use chrono::Utc;

    fn snap(query: &str, ua: &str) -> SignalSnapshot {
        SignalSnapshot::from_record(&CaptureRecord {
            company: "co".into(),
            pixel: "px".into(),
            ip: "8.8.8.8".into(),
            path: "/p_SMART.GIF".into(),
            query: query.into(),
            headers: "{}".into(),
            ua: ua.into(),
            referer: String::new(),
            received_at: Utc::now(),
        })
    }

    #[test]
    fn rules_declare_impossible_first() {
        let mut last = Severity::Impossible;
        for rule in RULES {
            assert!(rule.severity >= last, "rule {} out of order", rule.name);
            last = rule.severity;
        }
    }

    #[test]
    fn windows_safari_fires() {
        let s = snap(
            "sw=1920",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/605.1.15 Version/16.0 Safari/605.1.15",
        );
        let fired = evaluate(&s);
        assert!(fired.contains(&"WindowsSafari"));
    }

    #[test]
    fn real_windows_chrome_fires_nothing() {
        let s = snap(
            "sw=1920&sh=1080&cores=8&mem=8&me=2.4&touch=0&tp=0",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0.0.0 Safari/537.36",
        );
        assert!(evaluate(&s).is_empty());
    }

    #[test]
    fn flags_preserve_declared_order() {
        // Fires WindowsSafari (Impossible) and LowMemoryManyCores (Suspicious)
        let s = snap(
            "mem=0.25&cores=16",
            "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/605.1.15 Version/16.0 Safari/605.1.15",
        );
        let fired = evaluate(&s);
        let ws = fired.iter().position(|f| *f == "WindowsSafari").unwrap();
        let lm = fired.iter().position(|f| *f == "LowMemoryManyCores").unwrap();
        assert!(ws < lm);
    }

    #[test]
    fn mac_reporting_direct3d_is_impossible() {
        let s = snap(
            "plat=MacIntel&gpu=ANGLE%20(Direct3D11%20vs_5_0)",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
        );
        assert!(evaluate(&s).contains(&"MacDirect3D"));
    }

    #[test]
    fn touch_points_without_touch_support() {
        let s = snap("tp=5&touch=0", "Mozilla/5.0 (Windows NT 10.0)");
        assert!(evaluate(&s).contains(&"TouchPointsWithoutTouch"));
    }

    #[test]
    fn webdriver_with_human_mouse() {
        let s = snap("wd=1&me=2.5", "Mozilla/5.0 (Windows NT 10.0) Chrome/120.0 Safari/537.36");
        assert!(evaluate(&s).contains(&"WebdriverWithMouse"));
    }

    #[test]
    fn every_rule_is_evaluated_without_short_circuit() {
        // A snapshot firing rules across all severities still reports each.
        let s = snap(
            "plat=Linux%20x86_64&fonts=Menlo&tp=4&touch=0&wd=1&me=3.0&mem=0.5&cores=16&gpu=llvmpipe",
            "Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0 Safari/537.36",
        );
        let fired = evaluate(&s);
        assert!(fired.contains(&"AppleFontsOnLinux"));
        assert!(fired.contains(&"TouchPointsWithoutTouch"));
        assert!(fired.contains(&"ManyCoresSoftwareGpu"));
        assert!(fired.contains(&"WebdriverWithMouse"));
        assert!(fired.contains(&"LowMemoryManyCores"));
    }
}
