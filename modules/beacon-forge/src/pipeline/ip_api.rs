//! External IP geolocation via the HTTP+JSON lookup service.
//!
//! The provider is paid and rate-limited, so three guards sit in front of
//! every call: only public IPs are looked up, IPs already in the warehouse
//! geo table are skipped until their entry is 90 days stale, and a refilled
//! semaphore caps calls per minute. A lookup that cannot get a permit or
//! times out appends nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use beacon_common::ShutdownSignal;
use beacon_warehouse::{GeoUpdate, WarehouseClient};

use super::{Enricher, EnrichmentContext, SignalSnapshot};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const STALE_AFTER_DAYS: i64 = 90;

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,
    #[serde(rename = "regionName", default)]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    zip: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(rename = "as", default)]
    asn: Option<String>,
    #[serde(default)]
    reverse: Option<String>,
    #[serde(default)]
    mobile: bool,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    hosting: bool,
}

pub struct IpApiEnricher {
    http: reqwest::Client,
    base_url: String,
    key: String,
    warehouse: WarehouseClient,
    known: Mutex<HashMap<String, DateTime<Utc>>>,
    limiter: Arc<Semaphore>,
    per_minute: usize,
}

impl IpApiEnricher {
    pub fn new(
        base_url: String,
        key: String,
        per_minute: usize,
        warehouse: WarehouseClient,
    ) -> Self {
        let per_minute = per_minute.max(1);
        Self {
            http: reqwest::Client::builder()
                .timeout(LOOKUP_TIMEOUT)
                .build()
                .expect("reqwest client builds"),
            base_url,
            key,
            warehouse,
            known: Mutex::new(HashMap::new()),
            limiter: Arc::new(Semaphore::new(per_minute)),
            per_minute,
        }
    }

    /// Seed the known-IP set from the warehouse geo table.
    pub async fn load_known_ips(&self) {
        match self.warehouse.known_geo_ips().await {
            Ok(map) => {
                info!(count = map.len(), "Known-IP set loaded");
                *self.known.lock().await = map;
            }
            Err(e) => {
                warn!(error = %e, "Could not load known-IP set, starting empty");
            }
        }
    }

    /// Top the per-minute budget back up once a minute.
    pub fn spawn_refill_loop(self: &Arc<Self>, mut shutdown: ShutdownSignal) {
        let enricher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {
                        let available = enricher.limiter.available_permits();
                        if available < enricher.per_minute {
                            enricher.limiter.add_permits(enricher.per_minute - available);
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    async fn is_fresh(&self, ip: &str, now: DateTime<Utc>) -> bool {
        self.known
            .lock()
            .await
            .get(ip)
            .is_some_and(|fetched| (now - *fetched).num_days() < STALE_AFTER_DAYS)
    }

    async fn lookup(&self, ip: &str) -> Option<IpApiResponse> {
        let url = format!(
            "{}/json/{}?key={}&fields=status,message,country,countryCode,regionName,city,zip,lat,lon,timezone,isp,org,as,reverse,mobile,proxy,hosting",
            self.base_url, ip, self.key
        );
        let response = self.http.get(&url).send().await.ok()?;
        let body: IpApiResponse = response.json().await.ok()?;
        if body.status != "success" {
            debug!(ip, message = ?body.message, "Lookup service returned failure");
            return None;
        }
        Some(body)
    }
}

#[async_trait]
impl Enricher for IpApiEnricher {
    fn name(&self) -> &'static str {
        "ip-api"
    }

    async fn enrich(
        &self,
        ctx: &mut EnrichmentContext,
        snap: &SignalSnapshot,
    ) -> anyhow::Result<()> {
        if !snap.is_public_ip() {
            return Ok(());
        }
        let ip = ctx.record.ip.clone();
        let now = Utc::now();
        if self.is_fresh(&ip, now).await {
            return Ok(());
        }

        // Over budget for this minute: skip silently, the next sighting of
        // this IP will try again. Permits are consumed, not returned; the
        // refill loop restores the budget.
        let Ok(permit) = self.limiter.try_acquire() else {
            return Ok(());
        };
        permit.forget();

        let Some(body) = self.lookup(&ip).await else {
            return Ok(());
        };

        if let Some(v) = &body.country_code {
            ctx.append("ipapiCC", v);
        }
        if let Some(v) = &body.isp {
            ctx.append("ipapiISP", v);
        }
        if body.proxy {
            ctx.append("ipapiProxy", "1");
        }
        if body.mobile {
            ctx.append("ipapiMobile", "1");
        }
        if let Some(v) = &body.reverse {
            ctx.append("ipapiReverse", v);
        }
        if let Some(v) = &body.asn {
            ctx.append("ipapiASN", v);
        }

        self.warehouse
            .upsert_geo(&GeoUpdate {
                ip: ip.clone(),
                country: body.country,
                country_code: body.country_code,
                region: body.region_name,
                city: body.city,
                zip: body.zip,
                lat: body.lat,
                lon: body.lon,
                timezone: body.timezone,
                isp: body.isp,
                org: body.org,
                asn: body.asn,
                reverse: body.reverse,
                mobile: body.mobile,
                proxy: body.proxy,
                hosting: body.hosting,
            })
            .await;
        self.known.lock().await.insert(ip, now);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_provider_shape() {
        let body: IpApiResponse = serde_json::from_str(
            r#"{"status":"success","country":"United States","countryCode":"US",
                "regionName":"Virginia","city":"Ashburn","zip":"20149","lat":39.03,
                "lon":-77.5,"timezone":"America/New_York","isp":"Google LLC",
                "org":"Google Public DNS","as":"AS15169 Google LLC",
                "reverse":"dns.google","mobile":false,"proxy":false,"hosting":true}"#,
        )
        .unwrap();
        assert_eq!(body.status, "success");
        assert_eq!(body.country_code.as_deref(), Some("US"));
        assert_eq!(body.asn.as_deref(), Some("AS15169 Google LLC"));
        assert!(body.hosting);
    }

    #[test]
    fn failure_status_parses_with_message() {
        let body: IpApiResponse = serde_json::from_str(
            r#"{"status":"fail","message":"private range"}"#,
        )
        .unwrap();
        assert_eq!(body.status, "fail");
        assert_eq!(body.message.as_deref(), Some("private range"));
    }
}
