//! Edge-side classification services.
//!
//! These run inside the capture path, so every operation here is an
//! in-memory lookup or an amortized O(1) counter update. Results are
//! appended to the record's query string as `_srv_*` tokens before enqueue.

pub mod datacenter;
pub mod geo;
pub mod ip_class;
pub mod stability;
pub mod velocity;

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use beacon_common::query::{raw_value, SrvTokens};

pub use datacenter::DatacenterTable;
pub use geo::GeoCache;
pub use ip_class::IpClass;
pub use stability::{Stability, StabilityTracker};
pub use velocity::SubnetVelocity;

pub struct EdgeClassifiers {
    pub stability: StabilityTracker,
    pub velocity: SubnetVelocity,
    pub datacenter: Arc<DatacenterTable>,
    pub geo: GeoCache,
}

impl EdgeClassifiers {
    /// Run every edge classifier for one capture and collect the `_srv_*`
    /// tokens to append. Missing values are omitted, never empty.
    pub fn append_tokens(
        &self,
        ip: IpAddr,
        query: &str,
        ua: &str,
        now: DateTime<Utc>,
    ) -> SrvTokens {
        let mut tokens = SrvTokens::new();

        let fp_hash = fingerprint_hash(query, ua);
        let (stability, seen) = self.stability.observe(ip, fp_hash, now);
        tokens.append("fpStability", stability.as_str());
        tokens.append("fpSeen", &seen.to_string());

        let reading = self.velocity.observe(ip, now);
        if reading.subnet_ips > 0 {
            tokens.append("subnetVelocity", &reading.subnet_ips.to_string());
        }
        if reading.rapid_fire {
            tokens.append("rapidFire", "1");
        }

        let class = ip_class::classify(ip);
        tokens.append("ipType", class.as_str());

        if class.is_public() {
            if let Some(provider) = self.datacenter.lookup(ip) {
                tokens.append("datacenter", &provider);
            }
            if let Some(entry) = self.geo.lookup(ip, now) {
                if let Some(country) = &entry.country {
                    tokens.append("geoCountry", country);
                }
                if let Some(city) = &entry.city {
                    tokens.append("geoCity", city);
                }
                if let Some(tz) = &entry.timezone {
                    tokens.append("geoTz", tz);
                }
                if let Some(isp) = &entry.isp {
                    tokens.append("geoIsp", isp);
                }
            }
        }

        tokens
    }
}

/// Stable in-process hash of the client fingerprint: the `fp` query value
/// when the script sent one, the raw user agent otherwise.
pub fn fingerprint_hash(query: &str, ua: &str) -> u64 {
    match raw_value(query, "fp").filter(|v| !v.is_empty()) {
        Some(fp) => fxhash::hash64(fp.as_bytes()),
        None => fxhash::hash64(ua.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifiers() -> EdgeClassifiers {
        EdgeClassifiers {
            stability: StabilityTracker::new(),
            velocity: SubnetVelocity::new(),
            datacenter: Arc::new(DatacenterTable::load(None).unwrap()),
            geo: GeoCache::new(None),
        }
    }

    #[test]
    fn public_ip_gets_type_and_stability_tokens() {
        let c = classifiers();
        let tokens = c.append_tokens("8.8.8.8".parse().unwrap(), "fp=abc&sw=1920", "", Utc::now());
        let merged = tokens.merge_into("fp=abc&sw=1920");
        assert!(merged.contains("_srv_ipType=Public"));
        assert!(merged.contains("_srv_fpStability=ok"));
        assert!(merged.contains("_srv_fpSeen=1"));
    }

    #[test]
    fn private_ip_skips_geo_and_datacenter() {
        let c = classifiers();
        let tokens =
            c.append_tokens("192.168.5.7".parse().unwrap(), "fp=abc&sw=1", "", Utc::now());
        let merged = tokens.merge_into("");
        assert!(merged.contains("_srv_ipType=Private"));
        assert!(!merged.contains("_srv_datacenter"));
        assert!(!merged.contains("_srv_geo"));
    }

    #[test]
    fn datacenter_ip_is_labeled() {
        let c = classifiers();
        let tokens = c.append_tokens("3.5.140.2".parse().unwrap(), "fp=abc&sw=1", "", Utc::now());
        assert!(tokens.merge_into("").contains("_srv_datacenter=aws"));
    }

    #[test]
    fn fingerprint_hash_prefers_fp_param() {
        assert_eq!(
            fingerprint_hash("fp=abc&x=1", "ua-one"),
            fingerprint_hash("fp=abc&y=2", "ua-two")
        );
        assert_ne!(
            fingerprint_hash("x=1", "ua-one"),
            fingerprint_hash("x=1", "ua-two")
        );
    }
}
