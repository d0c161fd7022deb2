use std::sync::Arc;
use std::time::Instant;

use beacon_common::{EdgeConfig, Result};

use crate::classify::{DatacenterTable, EdgeClassifiers, GeoCache, StabilityTracker, SubnetVelocity};
use crate::queue::CaptureQueue;

/// Everything the HTTP handlers need, owned once and shared by reference.
pub struct EdgeState {
    pub config: EdgeConfig,
    pub queue: Arc<CaptureQueue>,
    pub classifiers: EdgeClassifiers,
    pub started_at: Instant,
}

impl EdgeState {
    pub fn new(config: EdgeConfig) -> Result<Self> {
        let datacenter = Arc::new(DatacenterTable::load(config.datacenter_ranges_path.clone())?);
        let reader = config
            .mmdb_path
            .as_deref()
            .and_then(GeoCache::open_reader);

        Ok(Self {
            queue: Arc::new(CaptureQueue::new(config.queue_capacity)),
            classifiers: EdgeClassifiers {
                stability: StabilityTracker::new(),
                velocity: SubnetVelocity::new(),
                datacenter,
                geo: GeoCache::new(reader),
            },
            config,
            started_at: Instant::now(),
        })
    }
}
