//! Offline MaxMind lookups: city database for country/city, ASN database
//! for the network number. Both are optional; a missing database simply
//! appends nothing.

use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use tracing::{info, warn};

use super::{Enricher, EnrichmentContext, SignalSnapshot};

pub struct MaxmindEnricher {
    city: Option<Reader<Vec<u8>>>,
    asn: Option<Reader<Vec<u8>>>,
}

impl MaxmindEnricher {
    pub fn new(city_path: Option<&Path>, asn_path: Option<&Path>) -> Self {
        Self {
            city: city_path.and_then(open_reader),
            asn: asn_path.and_then(open_reader),
        }
    }
}

fn open_reader(path: &Path) -> Option<Reader<Vec<u8>>> {
    match Reader::open_readfile(path) {
        Ok(reader) => {
            info!(path = %path.display(), "MMDB loaded");
            Some(reader)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "MMDB unavailable");
            None
        }
    }
}

#[async_trait]
impl Enricher for MaxmindEnricher {
    fn name(&self) -> &'static str {
        "maxmind-geo"
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

        let mut country = None;
        let mut city_name = None;
        let mut asn = None;

        if let Some(reader) = &self.city {
            if let Ok(city) = reader.lookup::<geoip2::City>(ip) {
                country = city
                    .country
                    .as_ref()
                    .and_then(|c| c.iso_code)
                    .map(str::to_string);
                city_name = city
                    .city
                    .as_ref()
                    .and_then(|c| c.names.as_ref())
                    .and_then(|n| n.get("en"))
                    .map(|s| s.to_string());
            }
        }
        if let Some(reader) = &self.asn {
            if let Ok(record) = reader.lookup::<geoip2::Asn>(ip) {
                asn = record
                    .autonomous_system_number
                    .map(|n| format!("AS{n}"));
            }
        }

        if let Some(v) = country {
            ctx.append("mmCC", &v);
        }
        if let Some(v) = city_name {
            ctx.append("mmCity", &v);
        }
        if let Some(v) = asn {
            ctx.append("mmASN", &v);
        }
        Ok(())
    }
}
