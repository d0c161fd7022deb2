//! Infrastructure health probe.
//!
//! On-demand snapshot, cached for 15 seconds, gathered in parallel:
//! warehouse connectivity (plus the ETL watermark), data-flow lag, the
//! pipeline health view, the Edge queue depth, outbound endpoint probes,
//! process counters, a scan of today's log tail for ERROR lines, and the
//! circuit-breaker state. The overall label is derived from per-check
//! critical/warning rules.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use beacon_warehouse::WarehouseClient;

use crate::breaker::CircuitBreaker;

const CACHE_TTL: Duration = Duration::from_secs(15);
const LOG_TAIL_LINES: usize = 200;
const DATA_FLOW_WARN_SECS: i64 = 5 * 60;
const DATA_FLOW_CRITICAL_SECS: i64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub overall: &'static str,
    pub gathered_at: DateTime<Utc>,
    pub checks: Vec<HealthCheck>,
}

pub struct HealthProbe {
    warehouse: WarehouseClient,
    breaker: Arc<CircuitBreaker>,
    http: reqwest::Client,
    edge_queue_depth_url: String,
    probe_endpoints: Vec<String>,
    log_dir: PathBuf,
    started_at: Instant,
    cache: Mutex<Option<(Instant, Arc<HealthSnapshot>)>>,
}

impl HealthProbe {
    pub fn new(
        warehouse: WarehouseClient,
        breaker: Arc<CircuitBreaker>,
        edge_queue_depth_url: String,
        probe_endpoints: Vec<String>,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            warehouse,
            breaker,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(3))
                .build()
                .expect("reqwest client builds"),
            edge_queue_depth_url,
            probe_endpoints,
            log_dir,
            started_at: Instant::now(),
            cache: Mutex::new(None),
        }
    }

    /// Current snapshot, refreshed at most once per cache window.
    pub async fn snapshot(&self) -> Arc<HealthSnapshot> {
        let mut cache = self.cache.lock().await;
        if let Some((at, snapshot)) = cache.as_ref() {
            if at.elapsed() < CACHE_TTL {
                return snapshot.clone();
            }
        }
        let snapshot = Arc::new(self.gather().await);
        *cache = Some((Instant::now(), snapshot.clone()));
        snapshot
    }

    async fn gather(&self) -> HealthSnapshot {
        let (warehouse, data_flow, pipeline, edge_queue, endpoints, process, logs) = tokio::join!(
            self.check_warehouse(),
            self.check_data_flow(),
            self.check_pipeline_view(),
            self.check_edge_queue(),
            self.check_endpoints(),
            self.check_process(),
            self.check_logs(),
        );

        let mut checks = vec![warehouse, data_flow, pipeline, edge_queue, process, logs];
        checks.extend(endpoints);
        checks.push(self.check_breaker());

        let worst = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Ok);
        let overall = match worst {
            CheckStatus::Ok => "Healthy",
            CheckStatus::Warn => "Degraded",
            CheckStatus::Critical => "Critical",
        };

        HealthSnapshot {
            overall,
            gathered_at: Utc::now(),
            checks,
        }
    }

    async fn check_warehouse(&self) -> HealthCheck {
        match self.warehouse.ping_watermark().await {
            Ok(watermark) => HealthCheck {
                name: "warehouse",
                status: CheckStatus::Ok,
                detail: format!("watermark={watermark}"),
            },
            Err(e) => HealthCheck {
                name: "warehouse",
                status: CheckStatus::Critical,
                detail: e.to_string(),
            },
        }
    }

    /// Compare the most recent capture time against the wall clock.
    async fn check_data_flow(&self) -> HealthCheck {
        match self.warehouse.newest_received_at().await {
            Ok(Some(newest)) => {
                let lag = (Utc::now() - newest).num_seconds();
                let status = if lag > DATA_FLOW_CRITICAL_SECS {
                    CheckStatus::Critical
                } else if lag > DATA_FLOW_WARN_SECS {
                    CheckStatus::Warn
                } else {
                    CheckStatus::Ok
                };
                HealthCheck {
                    name: "data-flow",
                    status,
                    detail: format!("last capture {lag}s ago"),
                }
            }
            Ok(None) => HealthCheck {
                name: "data-flow",
                status: CheckStatus::Warn,
                detail: "raw table is empty".to_string(),
            },
            Err(e) => HealthCheck {
                name: "data-flow",
                status: CheckStatus::Warn,
                detail: e.to_string(),
            },
        }
    }

    /// A missing view degrades the report; no data is at risk.
    async fn check_pipeline_view(&self) -> HealthCheck {
        match self.warehouse.pipeline_health().await {
            Ok(stages) => {
                let unhealthy: Vec<&str> = stages
                    .iter()
                    .filter(|s| !s.healthy)
                    .map(|s| s.stage.as_str())
                    .collect();
                if unhealthy.is_empty() {
                    HealthCheck {
                        name: "pipeline",
                        status: CheckStatus::Ok,
                        detail: format!("{} stages healthy", stages.len()),
                    }
                } else {
                    HealthCheck {
                        name: "pipeline",
                        status: CheckStatus::Warn,
                        detail: format!("unhealthy stages: {}", unhealthy.join(",")),
                    }
                }
            }
            Err(e) => HealthCheck {
                name: "pipeline",
                status: CheckStatus::Warn,
                detail: format!("view unavailable: {e}"),
            },
        }
    }

    async fn check_edge_queue(&self) -> HealthCheck {
        #[derive(serde::Deserialize)]
        struct Depth {
            depth: usize,
            dropped: u64,
        }
        let result: Result<Depth, _> = async {
            self.http
                .get(&self.edge_queue_depth_url)
                .send()
                .await?
                .json::<Depth>()
                .await
        }
        .await;

        match result {
            Ok(depth) => HealthCheck {
                name: "edge-queue",
                status: if depth.dropped > 0 {
                    CheckStatus::Warn
                } else {
                    CheckStatus::Ok
                },
                detail: format!("depth={} dropped={}", depth.depth, depth.dropped),
            },
            Err(e) => HealthCheck {
                name: "edge-queue",
                status: CheckStatus::Warn,
                detail: format!("edge unreachable: {e}"),
            },
        }
    }

    async fn check_endpoints(&self) -> Vec<HealthCheck> {
        let mut checks = Vec::with_capacity(self.probe_endpoints.len());
        let probes = self.probe_endpoints.iter().map(|endpoint| async move {
            let outcome = self.http.get(endpoint).send().await;
            (endpoint.clone(), outcome)
        });
        for (endpoint, outcome) in futures::future::join_all(probes).await {
            checks.push(match outcome {
                Ok(response) if response.status().is_success() => HealthCheck {
                    name: "endpoint",
                    status: CheckStatus::Ok,
                    detail: endpoint,
                },
                Ok(response) => HealthCheck {
                    name: "endpoint",
                    status: CheckStatus::Warn,
                    detail: format!("{endpoint} -> {}", response.status()),
                },
                Err(e) => HealthCheck {
                    name: "endpoint",
                    status: CheckStatus::Warn,
                    detail: format!("{endpoint} -> {e}"),
                },
            });
        }
        checks
    }

    /// Uptime plus resident memory and thread count from `/proc/self`.
    async fn check_process(&self) -> HealthCheck {
        let uptime = self.started_at.elapsed().as_secs();
        let (rss_kb, threads) = read_proc_status().unwrap_or((0, 0));
        HealthCheck {
            name: "process",
            status: CheckStatus::Ok,
            detail: format!("uptime={uptime}s rss={rss_kb}kB threads={threads}"),
        }
    }

    /// Scan the last lines of today's log for ERROR entries, grouped by
    /// message.
    async fn check_logs(&self) -> HealthCheck {
        let path = self
            .log_dir
            .join(format!("forge.log.{}", Utc::now().format("%Y-%m-%d")));
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(_) => {
                return HealthCheck {
                    name: "logs",
                    status: CheckStatus::Ok,
                    detail: "no log file today".to_string(),
                }
            }
        };

        let groups = group_error_lines(&contents, LOG_TAIL_LINES);
        if groups.is_empty() {
            return HealthCheck {
                name: "logs",
                status: CheckStatus::Ok,
                detail: "no recent errors".to_string(),
            };
        }
        let mut summary: Vec<String> = groups
            .iter()
            .map(|(message, count)| format!("{count}x {message}"))
            .collect();
        summary.sort();
        HealthCheck {
            name: "logs",
            status: CheckStatus::Warn,
            detail: summary.join("; "),
        }
    }

    fn check_breaker(&self) -> HealthCheck {
        let snapshot = self.breaker.snapshot();
        let status = match snapshot.state {
            crate::breaker::BreakerState::Closed => CheckStatus::Ok,
            crate::breaker::BreakerState::HalfOpen => CheckStatus::Warn,
            crate::breaker::BreakerState::Open => CheckStatus::Critical,
        };
        HealthCheck {
            name: "circuit-breaker",
            status,
            detail: match snapshot.trip_reason {
                Some(reason) => reason,
                None => format!("{:?}", snapshot.state),
            },
        }
    }
}

/// ERROR lines in the last `tail` lines, grouped by extracted message.
fn group_error_lines(contents: &str, tail: usize) -> HashMap<String, usize> {
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(tail);
    let mut groups: HashMap<String, usize> = HashMap::new();
    for line in &lines[start..] {
        if let Some(idx) = line.find("ERROR") {
            let message = line[idx + "ERROR".len()..].trim();
            let message = message.split(" error=").next().unwrap_or(message);
            *groups.entry(message.to_string()).or_default() += 1;
        }
    }
    groups
}

fn read_proc_status() -> Option<(u64, u32)> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let mut rss_kb = 0u64;
    let mut threads = 0u32;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            rss_kb = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("Threads:") {
            threads = rest.trim().parse().unwrap_or(0);
        }
    }
    Some((rss_kb, threads))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_lines_group_by_message() {
        let log = "\
2025-06-01T12:00:00Z INFO starting
2025-06-01T12:00:01Z ERROR Batch write failed
2025-06-01T12:00:02Z ERROR Batch write failed
2025-06-01T12:00:03Z ERROR Journal append failed
2025-06-01T12:00:04Z INFO fine
";
        let groups = group_error_lines(log, 200);
        assert_eq!(groups.get("Batch write failed"), Some(&2));
        assert_eq!(groups.get("Journal append failed"), Some(&1));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn tail_limit_skips_old_lines() {
        let mut log = String::new();
        log.push_str("old ERROR ancient failure\n");
        for _ in 0..200 {
            log.push_str("INFO ok\n");
        }
        assert!(group_error_lines(&log, 200).is_empty());
    }

    #[test]
    fn proc_status_parses_on_linux() {
        if let Some((rss, threads)) = read_proc_status() {
            assert!(rss > 0);
            assert!(threads > 0);
        }
    }
}
