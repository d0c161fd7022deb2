//! Datacenter CIDR table.
//!
//! Sorted IPv4 ranges from the major cloud providers, matched by binary
//! search. The table is an immutable snapshot behind an `ArcSwap`: readers
//! never block, the weekly refresher publishes a whole new snapshot.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use ipnetwork::Ipv4Network;
use serde::Deserialize;
use tracing::{error, info, warn};

use beacon_common::{BeaconError, Result, ShutdownSignal};

/// Compiled-in default ranges; a configured file path overrides them.
const DEFAULT_RANGES: &str = include_str!("../../data/datacenter_ranges.json");

#[derive(Debug, Deserialize)]
struct RangeFile {
    providers: Vec<ProviderRanges>,
}

#[derive(Debug, Deserialize)]
struct ProviderRanges {
    name: String,
    cidrs: Vec<String>,
}

/// One contiguous range, start/end inclusive, with an index into `providers`.
#[derive(Debug, Clone, Copy)]
struct Range {
    start: u32,
    end: u32,
    provider: usize,
}

pub struct RangeSnapshot {
    providers: Vec<Arc<str>>,
    ranges: Vec<Range>,
}

impl RangeSnapshot {
    fn parse(json: &str) -> Result<Self> {
        let file: RangeFile = serde_json::from_str(json)?;
        let mut providers = Vec::with_capacity(file.providers.len());
        let mut ranges = Vec::new();

        for (idx, provider) in file.providers.iter().enumerate() {
            providers.push(Arc::from(provider.name.as_str()));
            for cidr in &provider.cidrs {
                let net: Ipv4Network = cidr.parse().map_err(|e| {
                    BeaconError::Config(format!("bad CIDR {cidr} for {}: {e}", provider.name))
                })?;
                ranges.push(Range {
                    start: u32::from(net.network()),
                    end: u32::from(net.broadcast()),
                    provider: idx,
                });
            }
        }
        ranges.sort_unstable_by_key(|r| r.start);
        Ok(Self { providers, ranges })
    }

    fn lookup(&self, ip: Ipv4Addr) -> Option<&str> {
        let bits = u32::from(ip);
        let idx = self.ranges.partition_point(|r| r.start <= bits);
        if idx == 0 {
            return None;
        }
        let range = &self.ranges[idx - 1];
        if bits <= range.end {
            Some(&self.providers[range.provider])
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

pub struct DatacenterTable {
    snapshot: ArcSwap<RangeSnapshot>,
    override_path: Option<PathBuf>,
    refreshing: AtomicBool,
}

impl DatacenterTable {
    /// Load at startup: the override file when configured and readable, the
    /// compiled-in defaults otherwise.
    pub fn load(override_path: Option<PathBuf>) -> Result<Self> {
        let snapshot = match override_path.as_deref() {
            Some(path) => Self::read_file(path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Falling back to built-in datacenter ranges");
                RangeSnapshot::parse(DEFAULT_RANGES).expect("built-in datacenter ranges parse")
            }),
            None => RangeSnapshot::parse(DEFAULT_RANGES)?,
        };
        info!(ranges = snapshot.len(), "Datacenter table loaded");
        Ok(Self {
            snapshot: ArcSwap::new(Arc::new(snapshot)),
            override_path,
            refreshing: AtomicBool::new(false),
        })
    }

    fn read_file(path: &Path) -> Result<RangeSnapshot> {
        let json = std::fs::read_to_string(path)?;
        RangeSnapshot::parse(&json)
    }

    /// Provider label for the address, `None` for residential or non-IPv4.
    pub fn lookup(&self, ip: IpAddr) -> Option<String> {
        let IpAddr::V4(v4) = ip else {
            return None;
        };
        self.snapshot.load().lookup(v4).map(str::to_string)
    }

    /// Re-read the override file and swap in a new snapshot. Only one
    /// refresh runs at a time; readers keep the old table until the store.
    pub fn refresh(&self) {
        let Some(path) = self.override_path.clone() else {
            return;
        };
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        match Self::read_file(&path) {
            Ok(snapshot) => {
                info!(ranges = snapshot.len(), "Datacenter table refreshed");
                self.snapshot.store(Arc::new(snapshot));
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Datacenter refresh failed, keeping stale table");
            }
        }
        self.refreshing.store(false, Ordering::SeqCst);
    }

    /// Spawn the periodic refresh loop (weekly by default).
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        interval_secs: u64,
        mut shutdown: ShutdownSignal,
    ) {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            let interval = std::time::Duration::from_secs(interval_secs.max(60));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => table.refresh(),
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}
