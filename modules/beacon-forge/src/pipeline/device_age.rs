//! Device-age estimation.
//!
//! Triangulates three release years — GPU (hardware), OS version, and
//! browser version — into an age estimate, and flags combinations that make
//! no sense on real hardware (a brand-new GPU driven by a browser from
//! half a decade earlier, or a spread no physical device could have).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};

use super::gpu_tier::GpuTables;
use super::{Enricher, EnrichmentContext, SignalSnapshot};

/// Yearly anchors: the year the given major version shipped. Versions
/// between anchors take the year of the highest anchor at or below them.
const CHROME_ANCHORS: &[(u32, u16)] = &[
    (1, 2008),
    (10, 2011),
    (20, 2012),
    (30, 2013),
    (40, 2015),
    (50, 2016),
    (60, 2017),
    (70, 2018),
    (80, 2020),
    (90, 2021),
    (100, 2022),
    (110, 2023),
    (120, 2023),
    (125, 2024),
    (135, 2025),
];

const FIREFOX_ANCHORS: &[(u32, u16)] = &[
    (1, 2004),
    (10, 2012),
    (20, 2013),
    (30, 2014),
    (40, 2015),
    (50, 2016),
    (60, 2018),
    (70, 2019),
    (80, 2020),
    (90, 2021),
    (100, 2022),
    (110, 2023),
    (120, 2023),
    (125, 2024),
    (135, 2025),
];

const SAFARI_ANCHORS: &[(u32, u16)] = &[
    (5, 2010),
    (7, 2013),
    (9, 2015),
    (11, 2017),
    (13, 2019),
    (14, 2020),
    (15, 2021),
    (16, 2022),
    (17, 2023),
    (18, 2024),
];

fn anchor_year(anchors: &[(u32, u16)], major: u32) -> Option<u16> {
    if major < anchors.first()?.0 {
        return None;
    }
    let mut year = anchors[0].1;
    for (version, anchor) in anchors {
        if *version > major {
            break;
        }
        year = *anchor;
    }
    Some(year)
}

pub fn browser_year(browser: &str, version: &str) -> Option<u16> {
    let major: u32 = version.split('.').next()?.parse().ok()?;
    match browser {
        "Chrome" | "Chromium" | "Edge" | "Opera" | "Brave" | "Vivaldi" => {
            anchor_year(CHROME_ANCHORS, major)
        }
        "Firefox" => anchor_year(FIREFOX_ANCHORS, major),
        "Safari" => anchor_year(SAFARI_ANCHORS, major),
        _ => None,
    }
}

pub fn os_year(os: &str, version: &str) -> Option<u16> {
    match os {
        "Windows" => Some(match version {
            "11" => 2021,
            "10" => 2015,
            "8.1" => 2013,
            "8" => 2012,
            "7" => 2009,
            "Vista" => 2007,
            "XP" => 2001,
            _ => return None,
        }),
        "macOS" => {
            let mut parts = version.split('.');
            let major: u16 = parts.next()?.parse().ok()?;
            if major >= 11 {
                // Annual majors from Big Sur on
                Some(2009 + major)
            } else {
                let minor: u16 = parts.next()?.parse().ok()?;
                Some(if minor >= 6 { 2004 + minor } else { 2001 + minor })
            }
        }
        "Android" => {
            let major: u16 = version.split('.').next()?.parse().ok()?;
            Some((major + 2009).max(2008))
        }
        "iOS" => {
            let major: u16 = version.split('.').next()?.parse().ok()?;
            Some(major + 2006)
        }
        _ => None,
    }
}

pub struct DeviceAgeEnricher {
    tables: Arc<GpuTables>,
}

impl DeviceAgeEnricher {
    pub fn new(tables: Arc<GpuTables>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl Enricher for DeviceAgeEnricher {
    fn name(&self) -> &'static str {
        "device-age"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        let gpu_year = snap.gpu.as_deref().and_then(|g| self.tables.release_year(g));
        let os_release = match (ctx.appended("os"), ctx.appended("osVer")) {
            (Some(os), Some(ver)) => os_year(&os, &ver),
            _ => None,
        };
        let browser_release = match (ctx.appended("browser"), ctx.appended("browserVer")) {
            (Some(browser), Some(ver)) => browser_year(&browser, &ver),
            _ => None,
        };

        // Hardware defines age; the OS release is the fallback estimate.
        let Some(hardware_year) = gpu_year.or(os_release) else {
            return Ok(());
        };
        let now_year = Utc::now().year() as i32;
        let age = (now_year - hardware_year as i32).max(0);
        ctx.append("deviceAge", &age.to_string());

        let known: Vec<u16> = [gpu_year, os_release, browser_release]
            .into_iter()
            .flatten()
            .collect();
        let spread_anomaly = known.len() >= 2 && {
            let min = *known.iter().min().expect("non-empty");
            let max = *known.iter().max().expect("non-empty");
            max - min > 10
        };
        let stale_browser = matches!(
            (browser_release, gpu_year),
            (Some(b), Some(g)) if b + 6 <= g
        );
        if spread_anomaly || stale_browser {
            ctx.append("ageAnomaly", "1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_years_follow_anchors() {
        assert_eq!(browser_year("Chrome", "120.0.0.0"), Some(2023));
        assert_eq!(browser_year("Chrome", "45.0"), Some(2015));
        assert_eq!(browser_year("Firefox", "115.0"), Some(2023));
        assert_eq!(browser_year("Safari", "17.1"), Some(2023));
        assert_eq!(browser_year("Lynx", "2.8"), None);
    }

    #[test]
    fn os_years_cover_the_main_families() {
        assert_eq!(os_year("Windows", "10"), Some(2015));
        assert_eq!(os_year("Windows", "7"), Some(2009));
        assert_eq!(os_year("macOS", "10.15.7"), Some(2019));
        assert_eq!(os_year("macOS", "14.1"), Some(2023));
        assert_eq!(os_year("Android", "13"), Some(2022));
        assert_eq!(os_year("iOS", "17.1"), Some(2023));
        assert_eq!(os_year("TempleOS", "5"), None);
    }

    #[tokio::test]
    async fn gpu_year_drives_the_estimate() {
        use beacon_common::CaptureRecord;
        let enricher = DeviceAgeEnricher::new(Arc::new(GpuTables::load(None)));
        let record = CaptureRecord {
            company: "co".into(),
            pixel: "px".into(),
            ip: "8.8.8.8".into(),
            path: "/p_SMART.GIF".into(),
            query: "gpu=NVIDIA%20GeForce%20GTX%201060".into(),
            headers: "{}".into(),
            ua: String::new(),
            referer: String::new(),
            received_at: Utc::now(),
        };
        let snap = SignalSnapshot::from_record(&record);
        let mut ctx = EnrichmentContext::new(record);
        enricher.enrich(&mut ctx, &snap).await.unwrap();

        let expected_age = Utc::now().year() - 2016;
        assert_eq!(
            ctx.appended("deviceAge").as_deref(),
            Some(expected_age.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn ancient_browser_on_new_gpu_is_anomalous() {
        use beacon_common::CaptureRecord;
        let enricher = DeviceAgeEnricher::new(Arc::new(GpuTables::load(None)));
        let record = CaptureRecord {
            company: "co".into(),
            pixel: "px".into(),
            ip: "8.8.8.8".into(),
            path: "/p_SMART.GIF".into(),
            query: "gpu=NVIDIA%20GeForce%20RTX%204090".into(),
            headers: "{}".into(),
            ua: String::new(),
            referer: String::new(),
            received_at: Utc::now(),
        };
        let snap = SignalSnapshot::from_record(&record);
        let mut ctx = EnrichmentContext::new(record);
        // Simulate the UA pass having run earlier in the chain.
        ctx.append("browser", "Chrome");
        ctx.append("browserVer", "45.0");
        enricher.enrich(&mut ctx, &snap).await.unwrap();

        assert_eq!(ctx.appended("ageAnomaly").as_deref(), Some("1"));
    }
}
