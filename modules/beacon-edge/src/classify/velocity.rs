//! Subnet-velocity tracking: how many distinct addresses a /24 shows in a
//! five-minute window, plus a per-IP rapid-fire flag for sub-15-second gaps.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub struct VelocityReading {
    /// Distinct IPs observed in this address's /24 within the window.
    /// Zero for non-IPv4 sources.
    pub subnet_ips: usize,
    /// True when the same IP fired again in under the rapid-fire gap.
    pub rapid_fire: bool,
}

struct SubnetWindow {
    seen: VecDeque<(DateTime<Utc>, IpAddr)>,
}

pub struct SubnetVelocity {
    subnets: Mutex<HashMap<u32, SubnetWindow>>,
    last_seen: Mutex<HashMap<IpAddr, DateTime<Utc>>>,
    window: Duration,
    rapid_gap: Duration,
}

impl SubnetVelocity {
    pub fn new() -> Self {
        Self {
            subnets: Mutex::new(HashMap::new()),
            last_seen: Mutex::new(HashMap::new()),
            window: Duration::minutes(5),
            rapid_gap: Duration::seconds(15),
        }
    }

    pub fn observe(&self, ip: IpAddr, now: DateTime<Utc>) -> VelocityReading {
        let rapid_fire = {
            let mut last = self.last_seen.lock().expect("velocity tracker poisoned");
            let previous = last.insert(ip, now);
            previous.is_some_and(|t| now - t < self.rapid_gap)
        };

        let subnet_ips = match ip {
            IpAddr::V4(v4) => {
                let bucket = u32::from(v4) >> 8;
                let cutoff = now - self.window;
                let mut subnets = self.subnets.lock().expect("velocity tracker poisoned");
                let window = subnets
                    .entry(bucket)
                    .or_insert_with(|| SubnetWindow { seen: VecDeque::new() });
                while window.seen.front().is_some_and(|(t, _)| *t < cutoff) {
                    window.seen.pop_front();
                }
                window.seen.push_back((now, ip));

                let mut ips: Vec<IpAddr> = window.seen.iter().map(|(_, i)| *i).collect();
                ips.sort_unstable();
                ips.dedup();
                ips.len()
            }
            IpAddr::V6(_) => 0,
        };

        VelocityReading {
            subnet_ips,
            rapid_fire,
        }
    }

    /// Background eviction of empty windows and stale last-seen stamps.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        {
            let mut subnets = self.subnets.lock().expect("velocity tracker poisoned");
            subnets.retain(|_, w| {
                while w.seen.front().is_some_and(|(t, _)| *t < cutoff) {
                    w.seen.pop_front();
                }
                !w.seen.is_empty()
            });
        }
        let stale = now - self.rapid_gap * 4;
        let mut last = self.last_seen.lock().expect("velocity tracker poisoned");
        last.retain(|_, t| *t > stale);
    }
}

impl Default for SubnetVelocity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_distinct_ips_per_slash24() {
        let velocity = SubnetVelocity::new();
        let now = Utc::now();

        assert_eq!(velocity.observe("203.0.113.1".parse().unwrap(), now).subnet_ips, 1);
        assert_eq!(velocity.observe("203.0.113.2".parse().unwrap(), now).subnet_ips, 2);
        // repeat address does not add
        assert_eq!(velocity.observe("203.0.113.1".parse().unwrap(), now).subnet_ips, 2);
        // different /24 counts separately
        assert_eq!(velocity.observe("203.0.114.1".parse().unwrap(), now).subnet_ips, 1);
    }

    #[test]
    fn rapid_fire_flags_short_gaps_only() {
        let velocity = SubnetVelocity::new();
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        let now = Utc::now();

        assert!(!velocity.observe(ip, now).rapid_fire);
        assert!(velocity.observe(ip, now + Duration::seconds(5)).rapid_fire);
        assert!(!velocity.observe(ip, now + Duration::seconds(40)).rapid_fire);
    }

    #[test]
    fn window_expires_old_entries() {
        let velocity = SubnetVelocity::new();
        let now = Utc::now();
        velocity.observe("203.0.113.1".parse().unwrap(), now);
        let later = now + Duration::minutes(6);
        assert_eq!(velocity.observe("203.0.113.2".parse().unwrap(), later).subnet_ips, 1);
    }
}
