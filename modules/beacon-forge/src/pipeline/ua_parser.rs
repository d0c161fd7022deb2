//! User-agent parsing.
//!
//! Two passes over the same string: a core regex pass for browser and OS,
//! then an extended device-pattern pass for type, brand, and model. The
//! second pass only fills fields the first left empty. All regexes compile
//! once at startup.

use async_trait::async_trait;
use regex::Regex;

use super::{Enricher, EnrichmentContext, SignalSnapshot};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UaResult {
    pub browser: Option<String>,
    pub browser_ver: Option<String>,
    pub os: Option<String>,
    pub os_ver: Option<String>,
    pub device_type: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
}

struct BrowserPattern {
    regex: Regex,
    name: &'static str,
}

pub struct UaParserEnricher {
    browsers: Vec<BrowserPattern>,
    windows_nt: Regex,
    mac_os: Regex,
    android: Regex,
    ios: Regex,
    samsung_model: Regex,
    pixel_model: Regex,
}

impl UaParserEnricher {
    pub fn new() -> Self {
        // Order matters: Chromium derivatives carry a trailing Safari token,
        // and Edge/Opera carry a Chrome token, so the most specific match
        // must come first.
        let browser_specs: &[(&str, &str)] = &[
            (r"EdgiOS/(\d+[\.\d]*)", "Edge"),
            (r"Edge?/(\d+[\.\d]*)", "Edge"),
            (r"EdgA/(\d+[\.\d]*)", "Edge"),
            (r"OPR/(\d+[\.\d]*)", "Opera"),
            (r"Opera[/ ](\d+[\.\d]*)", "Opera"),
            (r"SamsungBrowser/(\d+[\.\d]*)", "Samsung Internet"),
            (r"YaBrowser/(\d+[\.\d]*)", "Yandex Browser"),
            (r"Vivaldi/(\d+[\.\d]*)", "Vivaldi"),
            (r"Brave/(\d+[\.\d]*)", "Brave"),
            (r"FxiOS/(\d+[\.\d]*)", "Firefox"),
            (r"Firefox/(\d+[\.\d]*)", "Firefox"),
            (r"CriOS/(\d+[\.\d]*)", "Chrome"),
            (r"Chromium/(\d+[\.\d]*)", "Chromium"),
            (r"Chrome/(\d+[\.\d]*)", "Chrome"),
            (r"Version/(\d+[\.\d]*).*Safari", "Safari"),
            (r"MSIE (\d+[\.\d]*)", "Internet Explorer"),
            (r"Trident/.*rv:(\d+[\.\d]*)", "Internet Explorer"),
        ];

        Self {
            browsers: browser_specs
                .iter()
                .map(|(pattern, name)| BrowserPattern {
                    regex: Regex::new(pattern).expect("browser pattern compiles"),
                    name,
                })
                .collect(),
            windows_nt: Regex::new(r"Windows NT (\d+\.\d+)").expect("pattern compiles"),
            mac_os: Regex::new(r"Mac OS X (\d+[._]\d+(?:[._]\d+)?)").expect("pattern compiles"),
            android: Regex::new(r"Android (\d+[\.\d]*)").expect("pattern compiles"),
            ios: Regex::new(r"(?:iPhone|CPU) OS (\d+(?:_\d+)*)").expect("pattern compiles"),
            samsung_model: Regex::new(r"\b(SM-[A-Z]\d+[A-Z0-9]*)").expect("pattern compiles"),
            pixel_model: Regex::new(r"\b(Pixel [0-9][0-9a-zA-Z ]*?)[);]").expect("pattern compiles"),
        }
    }

    pub fn parse(&self, ua: &str) -> UaResult {
        let mut result = UaResult::default();
        if ua.is_empty() {
            return result;
        }
        self.core_pass(ua, &mut result);
        self.device_pass(ua, &mut result);
        result
    }

    /// Pass one: browser family/version and operating system.
    fn core_pass(&self, ua: &str, result: &mut UaResult) {
        for pattern in &self.browsers {
            if let Some(caps) = pattern.regex.captures(ua) {
                result.browser = Some(pattern.name.to_string());
                result.browser_ver = caps.get(1).map(|m| m.as_str().to_string());
                break;
            }
        }

        if let Some(caps) = self.windows_nt.captures(ua) {
            result.os = Some("Windows".to_string());
            result.os_ver = Some(windows_release(&caps[1]).to_string());
        } else if let Some(caps) = self.ios.captures(ua) {
            result.os = Some("iOS".to_string());
            result.os_ver = Some(caps[1].replace('_', "."));
        } else if let Some(caps) = self.android.captures(ua) {
            result.os = Some("Android".to_string());
            result.os_ver = Some(caps[1].to_string());
        } else if let Some(caps) = self.mac_os.captures(ua) {
            result.os = Some("macOS".to_string());
            result.os_ver = Some(caps[1].replace('_', "."));
        } else if ua.contains("CrOS") {
            result.os = Some("ChromeOS".to_string());
        } else if ua.contains("Linux") {
            result.os = Some("Linux".to_string());
        }
    }

    /// Pass two: extended device patterns. Only fills what pass one left
    /// empty, so the two databases OR together.
    fn device_pass(&self, ua: &str, result: &mut UaResult) {
        if result.device_brand.is_none() {
            if let Some(caps) = self.samsung_model.captures(ua) {
                result.device_brand = Some("Samsung".to_string());
                result.device_model = Some(caps[1].to_string());
            } else if let Some(caps) = self.pixel_model.captures(ua) {
                result.device_brand = Some("Google".to_string());
                result.device_model = Some(caps[1].trim().to_string());
            } else if ua.contains("iPhone") {
                result.device_brand = Some("Apple".to_string());
                result.device_model = Some("iPhone".to_string());
            } else if ua.contains("iPad") {
                result.device_brand = Some("Apple".to_string());
                result.device_model = Some("iPad".to_string());
            } else if ua.contains("Macintosh") {
                result.device_brand = Some("Apple".to_string());
                result.device_model = Some("Mac".to_string());
            }
        }

        if result.device_type.is_none() {
            result.device_type = Some(
                if ua.contains("iPad") || (ua.contains("Android") && !ua.contains("Mobile")) {
                    "Tablet"
                } else if ua.contains("Mobile") || ua.contains("iPhone") {
                    "Mobile"
                } else if ua.contains("TV") || ua.contains("SmartTV") {
                    "TV"
                } else {
                    "Desktop"
                }
                .to_string(),
            );
        }
    }
}

impl Default for UaParserEnricher {
    fn default() -> Self {
        Self::new()
    }
}

fn windows_release(nt: &str) -> &'static str {
    match nt {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        "6.0" => "Vista",
        "5.1" | "5.2" => "XP",
        _ => "Unknown",
    }
}

#[async_trait]
impl Enricher for UaParserEnricher {
    fn name(&self) -> &'static str {
        "ua-parser"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        let parsed = self.parse(&snap.ua);
        if let Some(v) = &parsed.browser {
            ctx.append("browser", v);
        }
        if let Some(v) = &parsed.browser_ver {
            ctx.append("browserVer", v);
        }
        if let Some(v) = &parsed.os {
            ctx.append("os", v);
        }
        if let Some(v) = &parsed.os_ver {
            ctx.append("osVer", v);
        }
        if let Some(v) = &parsed.device_type {
            ctx.append("deviceType", v);
        }
        if let Some(v) = &parsed.device_brand {
            ctx.append("deviceBrand", v);
        }
        if let Some(v) = &parsed.device_model {
            ctx.append("deviceModel", v);
        }
        Ok(())
    }
}
