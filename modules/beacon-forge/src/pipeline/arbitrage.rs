//! Geographic-arbitrage scoring.
//!
//! Cross-checks the culturally-determined browser signals (fonts, language,
//! timezone, number format, calendar, speech voices) against the geo country
//! resolved at the edge. Sub-checks are weighted to sum to 100; a check that
//! cannot be evaluated grants its full weight. The font-platform check may
//! take a proportional deduction instead of all-or-nothing.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::{Enricher, EnrichmentContext, PlatformFamily, SignalSnapshot};

const DEFAULT_DATA: &str = include_str!("../../data/cultural_data.json");

const WEIGHT_PLATFORM_FONTS: u32 = 25;
const WEIGHT_REGIONAL_FONTS: u32 = 10;
const WEIGHT_LANGUAGE: u32 = 20;
const WEIGHT_TIMEZONE: u32 = 20;
const WEIGHT_DECIMAL: u32 = 10;
const WEIGHT_CALENDAR: u32 = 10;
const WEIGHT_VOICES: u32 = 5;

/// Points deducted per foreign-platform marker font.
const FOREIGN_FONT_PENALTY: u32 = 5;

#[derive(Debug, Deserialize)]
pub struct CulturalData {
    platform_fonts: HashMap<String, Vec<String>>,
    regional_fonts: HashMap<String, Vec<String>>,
    regional_font_countries: HashMap<String, HashSet<String>>,
    language_countries: HashMap<String, HashSet<String>>,
    country_tz_prefixes: HashMap<String, Vec<String>>,
    comma_decimal_countries: HashSet<String>,
    calendar_countries: HashMap<String, HashSet<String>>,
}

impl CulturalData {
    pub fn load(override_path: Option<&Path>) -> Self {
        let json = override_path
            .and_then(|p| match std::fs::read_to_string(p) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "Falling back to built-in cultural data");
                    None
                }
            })
            .unwrap_or_else(|| DEFAULT_DATA.to_string());

        serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!(error = %e, "Cultural data parse failed, using built-ins");
            serde_json::from_str(DEFAULT_DATA).expect("built-in cultural data parses")
        })
    }
}

#[derive(Debug)]
pub struct CulturalReading {
    pub score: u32,
    pub flags: Vec<&'static str>,
    /// Only set when both a browser timezone and a geo country were present.
    pub tz_match: Option<bool>,
}

pub struct CulturalEnricher {
    data: CulturalData,
}

impl CulturalEnricher {
    pub fn new(data: CulturalData) -> Self {
        Self { data }
    }

    pub fn score(&self, snap: &SignalSnapshot) -> CulturalReading {
        let mut score = 0u32;
        let mut flags = Vec::new();
        let country = snap.geo_country.as_deref();
        let family = snap.platform_family();

        score += self.platform_font_points(snap, family, &mut flags);
        score += self.regional_font_points(snap, country, &mut flags);
        score += self.language_points(snap, country, &mut flags);

        let (tz_points, tz_match) = self.timezone_points(snap, country, &mut flags);
        score += tz_points;

        score += self.decimal_points(snap, country, &mut flags);
        score += self.calendar_points(snap, country, &mut flags);
        score += self.voice_points(snap, family, &mut flags);

        CulturalReading {
            score: score.min(100),
            flags,
            tz_match,
        }
    }

    /// Fonts that only ship with a different desktop OS. Each foreign marker
    /// deducts a fixed slice of the weight; an all-foreign list zeroes it.
    fn platform_font_points(
        &self,
        snap: &SignalSnapshot,
        family: PlatformFamily,
        flags: &mut Vec<&'static str>,
    ) -> u32 {
        let own_key = match family {
            PlatformFamily::Windows => "windows",
            PlatformFamily::MacOs => "macos",
            PlatformFamily::Linux => "linux",
            _ => return WEIGHT_PLATFORM_FONTS,
        };
        if snap.fonts.is_empty() {
            return WEIGHT_PLATFORM_FONTS;
        }

        let fonts: HashSet<String> = snap
            .fonts
            .iter()
            .map(|f| f.to_ascii_lowercase())
            .collect();
        let mut foreign = 0u32;
        for (platform, markers) in &self.data.platform_fonts {
            if platform == own_key {
                continue;
            }
            foreign += markers
                .iter()
                .filter(|m| fonts.contains(&m.to_ascii_lowercase()))
                .count() as u32;
        }

        let deduction = (foreign * FOREIGN_FONT_PENALTY).min(WEIGHT_PLATFORM_FONTS);
        if deduction > 0 {
            flags.push("ForeignPlatformFonts");
        }
        WEIGHT_PLATFORM_FONTS - deduction
    }

    /// CJK/Arabic/Cyrillic font sets present where the geo country does not
    /// expect them.
    fn regional_font_points(
        &self,
        snap: &SignalSnapshot,
        country: Option<&str>,
        flags: &mut Vec<&'static str>,
    ) -> u32 {
        let Some(country) = country else {
            return WEIGHT_REGIONAL_FONTS;
        };
        if snap.fonts.is_empty() {
            return WEIGHT_REGIONAL_FONTS;
        }

        let fonts: HashSet<String> = snap
            .fonts
            .iter()
            .map(|f| f.to_ascii_lowercase())
            .collect();
        for (region, markers) in &self.data.regional_fonts {
            let present = markers
                .iter()
                .any(|m| fonts.contains(&m.to_ascii_lowercase()));
            if !present {
                continue;
            }
            let expected = self
                .data
                .regional_font_countries
                .get(region)
                .is_some_and(|set| set.contains(country));
            if !expected {
                flags.push("RegionalFontMismatch");
                return 0;
            }
        }
        WEIGHT_REGIONAL_FONTS
    }

    /// Primary language vs geo country. English is accepted everywhere.
    fn language_points(
        &self,
        snap: &SignalSnapshot,
        country: Option<&str>,
        flags: &mut Vec<&'static str>,
    ) -> u32 {
        let (Some(lang), Some(country)) = (snap.language.as_deref(), country) else {
            return WEIGHT_LANGUAGE;
        };
        let primary = lang
            .split(['-', '_'])
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        if primary.is_empty() || primary == "en" {
            return WEIGHT_LANGUAGE;
        }
        match self.data.language_countries.get(&primary) {
            Some(expected) if !expected.contains(country) => {
                flags.push("LanguageGeoMismatch");
                0
            }
            _ => WEIGHT_LANGUAGE,
        }
    }

    fn timezone_points(
        &self,
        snap: &SignalSnapshot,
        country: Option<&str>,
        flags: &mut Vec<&'static str>,
    ) -> (u32, Option<bool>) {
        let (Some(tz), Some(country)) = (snap.timezone.as_deref(), country) else {
            return (WEIGHT_TIMEZONE, None);
        };
        let Some(prefixes) = self.data.country_tz_prefixes.get(country) else {
            return (WEIGHT_TIMEZONE, None);
        };
        let matched = prefixes.iter().any(|p| tz.starts_with(p.as_str()));
        if matched {
            (WEIGHT_TIMEZONE, Some(true))
        } else {
            flags.push("TimezoneGeoMismatch");
            (0, Some(false))
        }
    }

    /// Decimal-separator convention: a comma sample from a dot country (or
    /// the reverse) is a mismatch.
    fn decimal_points(
        &self,
        snap: &SignalSnapshot,
        country: Option<&str>,
        flags: &mut Vec<&'static str>,
    ) -> u32 {
        let (Some(sample), Some(country)) = (snap.decimal_sample.as_deref(), country) else {
            return WEIGHT_DECIMAL;
        };
        let uses_comma = sample.contains(',');
        let expects_comma = self.data.comma_decimal_countries.contains(country);
        if uses_comma != expects_comma {
            flags.push("DecimalConventionMismatch");
            0
        } else {
            WEIGHT_DECIMAL
        }
    }

    fn calendar_points(
        &self,
        snap: &SignalSnapshot,
        country: Option<&str>,
        flags: &mut Vec<&'static str>,
    ) -> u32 {
        let (Some(calendar), Some(country)) = (snap.calendar.as_deref(), country) else {
            return WEIGHT_CALENDAR;
        };
        let calendar = calendar.to_ascii_lowercase();
        if calendar.is_empty() || calendar == "gregory" || calendar == "gregorian" {
            return WEIGHT_CALENDAR;
        }
        match self.data.calendar_countries.get(&calendar) {
            Some(expected) if !expected.contains(country) => {
                flags.push("CalendarGeoMismatch");
                0
            }
            _ => WEIGHT_CALENDAR,
        }
    }

    /// Every real desktop browser exposes speech-synthesis voices; zero on a
    /// desktop platform is a headless tell.
    fn voice_points(
        &self,
        snap: &SignalSnapshot,
        family: PlatformFamily,
        flags: &mut Vec<&'static str>,
    ) -> u32 {
        let desktop = matches!(
            family,
            PlatformFamily::Windows | PlatformFamily::MacOs | PlatformFamily::Linux
        );
        if desktop && snap.voices == Some(0) {
            flags.push("NoSpeechVoices");
            0
        } else {
            WEIGHT_VOICES
        }
    }
}

#[async_trait]
impl Enricher for CulturalEnricher {
    fn name(&self) -> &'static str {
        "geographic-arbitrage"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        let reading = self.score(snap);
        ctx.append("culturalScore", &reading.score.to_string());
        if !reading.flags.is_empty() {
            ctx.append("culturalFlags", &reading.flags.join(","));
        }
        if let Some(matched) = reading.tz_match {
            ctx.append("tzMatch", if matched { "1" } else { "0" });
        }
        Ok(())
    }
}
