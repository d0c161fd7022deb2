//! WHOIS ASN fallback.
//!
//! Only runs when neither the MMDB nor the lookup service produced an ASN.
//! Speaks the Team Cymru bulk-whois dialect over TCP with a 5-second bound
//! on the whole conversation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{Enricher, EnrichmentContext, SignalSnapshot};

const WHOIS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WhoisEnricher {
    host: String,
}

impl WhoisEnricher {
    pub fn new(host: String) -> Self {
        Self { host }
    }

    async fn query(&self, ip: &str) -> Option<String> {
        tokio::time::timeout(WHOIS_TIMEOUT, async {
            let mut stream = TcpStream::connect(&self.host).await.ok()?;
            let request = format!("begin\nverbose\n{ip}\nend\n");
            stream.write_all(request.as_bytes()).await.ok()?;
            let mut response = String::new();
            stream.read_to_string(&mut response).await.ok()?;
            Some(response)
        })
        .await
        .ok()
        .flatten()
    }
}

/// Parse one Cymru verbose response line:
/// `AS | IP | BGP Prefix | CC | Registry | Allocated | AS Name`.
/// Returns `(asn, org)`.
pub fn parse_cymru(response: &str) -> Option<(String, String)> {
    for line in response.lines() {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() < 7 {
            continue;
        }
        // Skip the header row
        if fields[0].eq_ignore_ascii_case("AS") {
            continue;
        }
        let asn: u32 = fields[0].parse().ok()?;
        let org = fields[6].to_string();
        if org.is_empty() || org == "NA" {
            return Some((format!("AS{asn}"), String::new()));
        }
        return Some((format!("AS{asn}"), org));
    }
    None
}

#[async_trait]
impl Enricher for WhoisEnricher {
    fn name(&self) -> &'static str {
        "whois-asn"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        if !snap.is_public_ip() {
            return Ok(());
        }
        // Fallback only: earlier classifiers may already have an ASN.
        if ctx.appended("mmASN").is_some() || ctx.appended("ipapiASN").is_some() {
            return Ok(());
        }

        let ip = ctx.record.ip.clone();
        let Some(response) = self.query(&ip).await else {
            return Ok(());
        };
        if let Some((asn, org)) = parse_cymru(&response) {
            ctx.append("whoisASN", &asn);
            if !org.is_empty() {
                ctx.append("whoisOrg", &org);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbose_response() {
        let response = "\
Bulk mode; whois.cymru.com [2025-06-01 12:00:00 +0000]
AS      | IP               | BGP Prefix          | CC | Registry | Allocated  | AS Name
15169   | 8.8.8.8          | 8.8.8.0/24          | US | arin     | 2023-12-28 | GOOGLE, US
";
        let (asn, org) = parse_cymru(response).unwrap();
        assert_eq!(asn, "AS15169");
        assert_eq!(org, "GOOGLE, US");
    }

    #[test]
    fn garbage_yields_none() {
        assert!(parse_cymru("Error: no entries found\n").is_none());
        assert!(parse_cymru("").is_none());
    }
}
