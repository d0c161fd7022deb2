//! The per-record signal snapshot.
//!
//! All primitive fields a classifier might want are decoded from the query
//! string exactly once, at pipeline entry. Classifiers receive the snapshot
//! by reference and never re-parse the query.

use beacon_common::query::decode;
use beacon_common::CaptureRecord;

#[derive(Debug, Default, Clone)]
pub struct SignalSnapshot {
    // Client-reported fields
    pub ua: String,
    pub platform: Option<String>,
    pub screen_w: Option<u32>,
    pub screen_h: Option<u32>,
    pub cores: Option<u32>,
    pub memory_gb: Option<f32>,
    pub touch_points: Option<u32>,
    pub touch_support: Option<bool>,
    pub gpu: Option<String>,
    pub gpu_vendor: Option<String>,
    pub fonts: Vec<String>,
    pub font_count: Option<u32>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub canvas: Option<String>,
    pub mouse_entropy: Option<f32>,
    pub mouse_path: Option<String>,
    pub webdriver: Option<bool>,
    pub battery: Option<bool>,
    pub hover: Option<bool>,
    pub voices: Option<u32>,
    pub decimal_sample: Option<String>,
    pub calendar: Option<String>,
    pub fingerprint: Option<String>,

    // Edge-appended tokens
    pub ip_type: Option<String>,
    pub datacenter: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub geo_tz: Option<String>,
    pub geo_isp: Option<String>,
    pub fp_stability: Option<String>,
    pub rapid_fire: bool,
}

impl SignalSnapshot {
    /// Single-pass decode of the record's query string. Unknown keys are
    /// skipped; the UA falls back to the request header when the script did
    /// not echo one.
    pub fn from_record(record: &CaptureRecord) -> Self {
        let mut snap = SignalSnapshot {
            ua: record.ua.clone(),
            ..Default::default()
        };

        for pair in record.query.split('&') {
            let (key, raw) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            if raw.is_empty() {
                continue;
            }
            let value = decode(raw);

            match key {
                "ua" => snap.ua = value.into_owned(),
                "plat" => snap.platform = Some(value.into_owned()),
                "sw" => snap.screen_w = value.parse().ok(),
                "sh" => snap.screen_h = value.parse().ok(),
                "cores" => snap.cores = value.parse().ok(),
                "mem" => snap.memory_gb = value.parse().ok(),
                "tp" => snap.touch_points = value.parse().ok(),
                "touch" => snap.touch_support = parse_bool(&value),
                "gpu" => snap.gpu = Some(value.into_owned()),
                "gpuv" => snap.gpu_vendor = Some(value.into_owned()),
                "fonts" => {
                    snap.fonts = value
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "fc" => snap.font_count = value.parse().ok(),
                "lang" => snap.language = Some(value.into_owned()),
                "tz" => snap.timezone = Some(value.into_owned()),
                "canvas" => snap.canvas = Some(value.into_owned()),
                "me" => snap.mouse_entropy = value.parse().ok(),
                "mp" => snap.mouse_path = Some(value.into_owned()),
                "wd" => snap.webdriver = parse_bool(&value),
                "bat" => snap.battery = parse_bool(&value),
                "hover" => snap.hover = parse_bool(&value),
                "voices" => snap.voices = value.parse().ok(),
                "dec" => snap.decimal_sample = Some(value.into_owned()),
                "cal" => snap.calendar = Some(value.into_owned()),
                "fp" => snap.fingerprint = Some(value.into_owned()),
                "_srv_ipType" => snap.ip_type = Some(value.into_owned()),
                "_srv_datacenter" => snap.datacenter = Some(value.into_owned()),
                "_srv_geoCountry" => snap.geo_country = Some(value.into_owned()),
                "_srv_geoCity" => snap.geo_city = Some(value.into_owned()),
                "_srv_geoTz" => snap.geo_tz = Some(value.into_owned()),
                "_srv_geoIsp" => snap.geo_isp = Some(value.into_owned()),
                "_srv_fpStability" => snap.fp_stability = Some(value.into_owned()),
                "_srv_rapidFire" => snap.rapid_fire = value == "1",
                _ => {}
            }
        }

        snap
    }

    /// Effective font count: the explicit counter when present, otherwise
    /// the enumerated list length.
    pub fn effective_font_count(&self) -> u32 {
        self.font_count.unwrap_or(self.fonts.len() as u32)
    }

    pub fn is_public_ip(&self) -> bool {
        self.ip_type.as_deref() == Some("Public")
    }

    /// Rough platform family. The reported platform string wins; the UA is
    /// only consulted when the script sent none.
    pub fn platform_family(&self) -> PlatformFamily {
        let platform = self.platform.as_deref().unwrap_or("").to_ascii_lowercase();
        if !platform.is_empty() {
            if platform.contains("iphone") || platform.contains("ipad") {
                return PlatformFamily::Ios;
            }
            if platform.contains("win") {
                return PlatformFamily::Windows;
            }
            if platform.contains("mac") {
                return PlatformFamily::MacOs;
            }
            if platform.contains("android") {
                return PlatformFamily::Android;
            }
            if platform.contains("linux") {
                return PlatformFamily::Linux;
            }
        }

        let ua = self.ua.to_ascii_lowercase();
        if ua.contains("iphone") || ua.contains("ipad") {
            PlatformFamily::Ios
        } else if ua.contains("windows") {
            PlatformFamily::Windows
        } else if ua.contains("macintosh") || ua.contains("mac os x") {
            PlatformFamily::MacOs
        } else if ua.contains("android") {
            PlatformFamily::Android
        } else if ua.contains("linux") {
            PlatformFamily::Linux
        } else {
            PlatformFamily::Unknown
        }
    }

    pub fn is_mobile_ua(&self) -> bool {
        let ua = self.ua.to_ascii_lowercase();
        ua.contains("mobile") || ua.contains("iphone") || ua.contains("android")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    Windows,
    MacOs,
    Linux,
    Android,
    Ios,
    Unknown,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
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
            ua: "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".into(),
            referer: String::new(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn decodes_primitives_once() {
        let snap = SignalSnapshot::from_record(&record(
            "sw=1920&sh=1080&cores=8&mem=8&touch=0&gpu=ANGLE%20(NVIDIA)&me=2.5&wd=0&_srv_ipType=Public",
        ));
        assert_eq!(snap.screen_w, Some(1920));
        assert_eq!(snap.cores, Some(8));
        assert_eq!(snap.touch_support, Some(false));
        assert_eq!(snap.gpu.as_deref(), Some("ANGLE (NVIDIA)"));
        assert_eq!(snap.mouse_entropy, Some(2.5));
        assert_eq!(snap.webdriver, Some(false));
        assert!(snap.is_public_ip());
    }

    #[test]
    fn query_ua_overrides_header() {
        let snap = SignalSnapshot::from_record(&record("ua=Custom%2FAgent"));
        assert_eq!(snap.ua, "Custom/Agent");

        let snap = SignalSnapshot::from_record(&record("sw=1"));
        assert!(snap.ua.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn fonts_list_and_count() {
        let snap = SignalSnapshot::from_record(&record("fonts=Arial,Helvetica,%20Georgia"));
        assert_eq!(snap.fonts, ["Arial", "Helvetica", "Georgia"]);
        assert_eq!(snap.effective_font_count(), 3);

        let snap = SignalSnapshot::from_record(&record("fc=12"));
        assert_eq!(snap.effective_font_count(), 12);
    }

    #[test]
    fn platform_family_detection() {
        let snap = SignalSnapshot::from_record(&record("plat=MacIntel"));
        assert_eq!(snap.platform_family(), PlatformFamily::MacOs);

        let snap = SignalSnapshot::from_record(&record("sw=1"));
        assert_eq!(snap.platform_family(), PlatformFamily::Windows);
    }
}
