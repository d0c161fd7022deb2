//! Known-bot detection over the user-agent string.

use async_trait::async_trait;

use super::{Enricher, EnrichmentContext, SignalSnapshot};

/// Lowercased UA substrings and the crawler family they identify. More
/// specific markers sit above the generic library markers.
const BOT_PATTERNS: &[(&str, &str)] = &[
    ("googlebot", "googlebot"),
    ("adsbot-google", "googlebot"),
    ("bingbot", "bingbot"),
    ("slurp", "yahoo"),
    ("duckduckbot", "duckduckgo"),
    ("baiduspider", "baidu"),
    ("yandexbot", "yandex"),
    ("applebot", "applebot"),
    ("facebookexternalhit", "facebook"),
    ("twitterbot", "twitter"),
    ("linkedinbot", "linkedin"),
    ("whatsapp", "whatsapp"),
    ("telegrambot", "telegram"),
    ("slackbot", "slack"),
    ("discordbot", "discord"),
    ("pinterestbot", "pinterest"),
    ("ahrefsbot", "ahrefs"),
    ("semrushbot", "semrush"),
    ("mj12bot", "majestic"),
    ("dotbot", "moz"),
    ("rogerbot", "moz"),
    ("petalbot", "petal"),
    ("bytespider", "bytedance"),
    ("gptbot", "openai"),
    ("chatgpt-user", "openai"),
    ("claudebot", "anthropic"),
    ("claude-web", "anthropic"),
    ("ccbot", "commoncrawl"),
    ("perplexitybot", "perplexity"),
    ("amazonbot", "amazon"),
    ("headlesschrome", "headless"),
    ("phantomjs", "headless"),
    ("electron", "headless"),
    ("selenium", "automation"),
    ("playwright", "automation"),
    ("puppeteer", "automation"),
    ("cypress", "automation"),
    ("wget", "cli"),
    ("curl/", "cli"),
    ("python-requests", "script"),
    ("python-urllib", "script"),
    ("aiohttp", "script"),
    ("go-http-client", "script"),
    ("java/", "script"),
    ("okhttp", "script"),
    ("axios", "script"),
    ("node-fetch", "script"),
    ("scrapy", "scraper"),
    ("httpclient", "script"),
    ("libwww-perl", "script"),
    ("uptimerobot", "monitor"),
    ("pingdom", "monitor"),
    ("statuscake", "monitor"),
    ("site24x7", "monitor"),
    ("crawler", "crawler"),
    ("spider", "crawler"),
    ("bot/", "crawler"),
    ("bot;", "crawler"),
];

pub struct BotUaEnricher;

/// Family label for a known crawler or automation UA, `None` for browsers.
pub fn match_bot(ua: &str) -> Option<&'static str> {
    if ua.is_empty() {
        return None;
    }
    let ua = ua.to_ascii_lowercase();
    BOT_PATTERNS
        .iter()
        .find(|(pattern, _)| ua.contains(pattern))
        .map(|(_, family)| *family)
}

#[async_trait]
impl Enricher for BotUaEnricher {
    fn name(&self) -> &'static str {
        "bot-ua"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        if let Some(family) = match_bot(&snap.ua) {
            ctx.append("knownBot", family);
        }
        Ok(())
    }
}
