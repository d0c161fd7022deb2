//! Reverse-DNS classification with a hard 2-second bound.
//!
//! A PTR answer lands in `_srv_rdns`; hostnames matching the cloud pattern
//! set additionally get `_srv_rdnsCloud`. The pattern set is a replaceable
//! data file with compiled-in defaults.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use super::{Enricher, EnrichmentContext, SignalSnapshot};

const DEFAULT_PATTERNS: &str = include_str!("../../data/cloud_hostnames.json");
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct PatternFile {
    patterns: Vec<PatternEntry>,
}

#[derive(Debug, Deserialize)]
struct PatternEntry {
    label: String,
    pattern: String,
}

pub struct CloudHostnames {
    patterns: Vec<(String, Regex)>,
}

impl CloudHostnames {
    /// Load the pattern set: the override file when configured and valid,
    /// the compiled-in defaults otherwise.
    pub fn load(override_path: Option<&Path>) -> Self {
        let json = override_path
            .and_then(|p| match std::fs::read_to_string(p) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "Falling back to built-in cloud hostname patterns");
                    None
                }
            })
            .unwrap_or_else(|| DEFAULT_PATTERNS.to_string());

        let file: PatternFile =
            serde_json::from_str(&json).unwrap_or_else(|_| PatternFile { patterns: vec![] });
        let patterns = file
            .patterns
            .into_iter()
            .filter_map(|entry| match Regex::new(&entry.pattern) {
                Ok(regex) => Some((entry.label, regex)),
                Err(e) => {
                    warn!(pattern = %entry.pattern, error = %e, "Skipping bad cloud hostname pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn match_host(&self, host: &str) -> Option<&str> {
        let host = host.to_ascii_lowercase();
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(&host))
            .map(|(label, _)| label.as_str())
    }
}

pub struct RdnsEnricher {
    resolver: Option<TokioAsyncResolver>,
    cloud: CloudHostnames,
}

impl RdnsEnricher {
    pub fn new(override_path: Option<&Path>) -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => Some(resolver),
            Err(e) => {
                warn!(error = %e, "System resolver unavailable, reverse DNS disabled");
                None
            }
        };
        Self {
            resolver,
            cloud: CloudHostnames::load(override_path),
        }
    }

    async fn reverse(&self, ip: IpAddr) -> Option<String> {
        let resolver = self.resolver.as_ref()?;
        let lookup = tokio::time::timeout(LOOKUP_TIMEOUT, resolver.reverse_lookup(ip))
            .await
            .ok()?
            .ok()?;
        lookup
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
    }
}

#[async_trait]
impl Enricher for RdnsEnricher {
    fn name(&self) -> &'static str {
        "reverse-dns"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        if !snap.is_public_ip() {
            return Ok(());
        }
        let Ok(ip) = ctx.record.ip.parse::<IpAddr>() else {
            return Ok(());
        };
        let Some(host) = self.reverse(ip).await else {
            return Ok(());
        };

        ctx.append("rdns", &host);
        if let Some(label) = self.cloud.match_host(&host) {
            ctx.append("rdnsCloud", label);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_patterns_match_known_hosts() {
        let cloud = CloudHostnames::load(None);
        assert_eq!(
            cloud.match_host("ec2-3-5-140-2.us-east-2.compute.amazonaws.com"),
            Some("aws")
        );
        assert_eq!(
            cloud.match_host("123.45.67.89.bc.googleusercontent.com"),
            Some("gcp")
        );
        assert_eq!(
            cloud.match_host("static.88-198-1-1.clients.your-server.de"),
            Some("hetzner")
        );
        assert_eq!(cloud.match_host("host.comcast.net"), None);
    }

    #[test]
    fn override_file_replaces_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(
            &path,
            r#"{"patterns":[{"label":"testcloud","pattern":"\\.test\\.example$"}]}"#,
        )
        .unwrap();

        let cloud = CloudHostnames::load(Some(&path));
        assert_eq!(cloud.match_host("a.test.example"), Some("testcloud"));
        assert_eq!(cloud.match_host("x.amazonaws.com"), None);
    }
}
