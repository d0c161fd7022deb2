//! Two-tier geolocation cache over the local MMDB.
//!
//! A small LRU holds the hottest addresses; behind it sits a TTL-bounded map.
//! Misses are filled from the MMDB reader, which is the only geo source fast
//! enough for the parse path. Enrichers downstream treat the cache as
//! read-only.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use maxminddb::{geoip2, Reader};
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct GeoEntry {
    pub country: Option<String>,
    pub city: Option<String>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
}

impl GeoEntry {
    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.city.is_none() && self.timezone.is_none()
    }
}

pub struct GeoCache {
    hot: Mutex<LruCache<IpAddr, std::sync::Arc<GeoEntry>>>,
    warm: Mutex<HashMap<IpAddr, (DateTime<Utc>, std::sync::Arc<GeoEntry>)>>,
    ttl: Duration,
    reader: Option<Reader<Vec<u8>>>,
}

impl GeoCache {
    pub fn new(reader: Option<Reader<Vec<u8>>>) -> Self {
        Self::with_capacity(reader, 4_096, Duration::hours(6))
    }

    pub fn with_capacity(reader: Option<Reader<Vec<u8>>>, hot: usize, ttl: Duration) -> Self {
        Self {
            hot: Mutex::new(LruCache::new(
                NonZeroUsize::new(hot.max(1)).expect("non-zero hot capacity"),
            )),
            warm: Mutex::new(HashMap::new()),
            ttl,
            reader,
        }
    }

    /// Open the MMDB at `path`, logging and returning `None` on failure so a
    /// missing database degrades to geo-less capture.
    pub fn open_reader(path: &Path) -> Option<Reader<Vec<u8>>> {
        match Reader::open_readfile(path) {
            Ok(reader) => {
                info!(path = %path.display(), "Geo MMDB loaded");
                Some(reader)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Geo MMDB unavailable");
                None
            }
        }
    }

    pub fn lookup(&self, ip: IpAddr, now: DateTime<Utc>) -> Option<std::sync::Arc<GeoEntry>> {
        if let Some(entry) = self.hot.lock().expect("geo hot tier poisoned").get(&ip) {
            return Some(entry.clone());
        }

        {
            let warm = self.warm.lock().expect("geo warm tier poisoned");
            if let Some((stored_at, entry)) = warm.get(&ip) {
                if now - *stored_at < self.ttl {
                    let entry = entry.clone();
                    drop(warm);
                    self.hot
                        .lock()
                        .expect("geo hot tier poisoned")
                        .put(ip, entry.clone());
                    return Some(entry);
                }
            }
        }

        let entry = std::sync::Arc::new(self.resolve(ip)?);
        self.warm
            .lock()
            .expect("geo warm tier poisoned")
            .insert(ip, (now, entry.clone()));
        self.hot
            .lock()
            .expect("geo hot tier poisoned")
            .put(ip, entry.clone());
        Some(entry)
    }

    fn resolve(&self, ip: IpAddr) -> Option<GeoEntry> {
        let reader = self.reader.as_ref()?;
        let city: geoip2::City = reader.lookup(ip).ok()?;

        let entry = GeoEntry {
            country: city
                .country
                .as_ref()
                .and_then(|c| c.iso_code)
                .map(str::to_string),
            city: city
                .city
                .as_ref()
                .and_then(|c| c.names.as_ref())
                .and_then(|n| n.get("en"))
                .map(|s| s.to_string()),
            timezone: city
                .location
                .as_ref()
                .and_then(|l| l.time_zone)
                .map(str::to_string),
            isp: None,
        };
        Some(entry)
    }

    /// Drop expired warm entries. Runs from the background sweep task.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let mut warm = self.warm.lock().expect("geo warm tier poisoned");
        warm.retain(|_, (stored_at, _)| now - *stored_at < self.ttl);
    }

    pub fn warm_len(&self) -> usize {
        self.warm.lock().expect("geo warm tier poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reader_yields_no_entries() {
        let cache = GeoCache::new(None);
        assert!(cache.lookup("8.8.8.8".parse().unwrap(), Utc::now()).is_none());
    }

    #[test]
    fn sweep_expires_warm_entries() {
        let cache = GeoCache::with_capacity(None, 4, Duration::minutes(10));
        // Seed the warm tier directly; resolve() has no reader to call.
        cache.warm.lock().unwrap().insert(
            "8.8.8.8".parse().unwrap(),
            (Utc::now() - Duration::hours(1), Default::default()),
        );
        assert_eq!(cache.warm_len(), 1);
        cache.sweep(Utc::now());
        assert_eq!(cache.warm_len(), 0);
    }

    #[test]
    fn warm_hit_promotes_to_hot() {
        let cache = GeoCache::with_capacity(None, 4, Duration::minutes(10));
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        let entry = std::sync::Arc::new(GeoEntry {
            country: Some("US".into()),
            ..Default::default()
        });
        cache.warm.lock().unwrap().insert(ip, (Utc::now(), entry));

        let hit = cache.lookup(ip, Utc::now()).unwrap();
        assert_eq!(hit.country.as_deref(), Some("US"));
        assert!(cache.hot.lock().unwrap().contains(&ip));
    }
}
