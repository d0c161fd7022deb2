use std::env;
use std::path::PathBuf;

/// Configuration for the Edge capture process, loaded from environment
/// variables. Panics with a clear message if required vars are missing.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    // HTTP front end
    pub http_host: String,
    pub http_port: u16,

    // Pipe transport
    pub pipe_name: String,
    pub runtime_dir: PathBuf,
    /// Seconds between pipe reconnect attempts while journaling.
    pub pipe_retry_secs: u64,

    // Capture queue
    pub queue_capacity: usize,

    // Failover journal
    pub failover_dir: PathBuf,

    // Lookup data
    pub mmdb_path: Option<PathBuf>,
    /// Override for the compiled-in datacenter range table.
    pub datacenter_ranges_path: Option<PathBuf>,
    /// Seconds between datacenter table refreshes (default one week).
    pub datacenter_refresh_secs: u64,

    // Client script delivery
    pub script_dir: Option<PathBuf>,

    // Logging
    pub log_dir: PathBuf,
}

impl EdgeConfig {
    pub fn from_env() -> Self {
        Self {
            http_host: env::var("BEACON_HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: parsed_env("BEACON_HTTP_PORT", 8080),
            pipe_name: env::var("BEACON_PIPE_NAME")
                .unwrap_or_else(|_| crate::DEFAULT_PIPE_NAME.to_string()),
            runtime_dir: path_env("BEACON_RUNTIME_DIR", "/var/run/beacon"),
            pipe_retry_secs: parsed_env("BEACON_PIPE_RETRY_SECS", 10),
            queue_capacity: parsed_env("BEACON_QUEUE_CAPACITY", 10_000),
            failover_dir: path_env("BEACON_FAILOVER_DIR", "/var/lib/beacon/failover"),
            mmdb_path: env::var("BEACON_MMDB_PATH").ok().map(PathBuf::from),
            datacenter_ranges_path: env::var("BEACON_DATACENTER_RANGES_PATH")
                .ok()
                .map(PathBuf::from),
            datacenter_refresh_secs: parsed_env("BEACON_DATACENTER_REFRESH_SECS", 7 * 24 * 3600),
            script_dir: env::var("BEACON_SCRIPT_DIR").ok().map(PathBuf::from),
            log_dir: path_env("BEACON_LOG_DIR", "/var/log/beacon"),
        }
    }

    /// Filesystem path of the local socket both processes rendezvous on.
    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join(format!("{}.sock", self.pipe_name))
    }
}

/// Configuration for the Forge enrichment process.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    // Pipe transport
    pub pipe_name: String,
    pub runtime_dir: PathBuf,
    pub pipe_instances: usize,

    // Failover catch-up
    pub failover_dir: PathBuf,
    pub scan_interval_secs: u64,

    // Enrichment channel
    pub enrich_capacity: usize,

    // Bulk writer
    pub database_url: String,
    pub batch_size: usize,
    pub bulk_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    pub retry_delays_secs: Vec<u64>,
    pub deadletter_dir: PathBuf,
    pub breaker_cooldown_secs: u64,
    pub breaker_max_backoff_secs: u64,

    // Enricher services
    pub mmdb_path: Option<PathBuf>,
    pub mmdb_asn_path: Option<PathBuf>,
    pub ipapi_base_url: String,
    pub ipapi_key: String,
    pub ipapi_per_minute: usize,
    pub whois_host: String,
    pub session_timeout_secs: u64,
    pub cross_customer_window_secs: u64,
    /// Overrides for compiled-in pattern and reference tables.
    pub cloud_hostnames_path: Option<PathBuf>,
    pub cultural_data_path: Option<PathBuf>,
    pub gpu_tables_path: Option<PathBuf>,

    // Ops surface (loopback only)
    pub ops_host: String,
    pub ops_port: u16,

    // Health probe
    pub edge_queue_depth_url: String,
    pub probe_endpoints: Vec<String>,

    // ETL kick
    pub etl_procedures: Vec<String>,
    pub etl_interval_secs: u64,

    // Logging
    pub log_dir: PathBuf,
}

impl ForgeConfig {
    pub fn from_env() -> Self {
        Self {
            pipe_name: env::var("BEACON_PIPE_NAME")
                .unwrap_or_else(|_| crate::DEFAULT_PIPE_NAME.to_string()),
            runtime_dir: path_env("BEACON_RUNTIME_DIR", "/var/run/beacon"),
            pipe_instances: parsed_env("BEACON_PIPE_INSTANCES", 4),
            failover_dir: path_env("BEACON_FAILOVER_DIR", "/var/lib/beacon/failover"),
            scan_interval_secs: parsed_env("BEACON_SCAN_INTERVAL_SECS", 60),
            enrich_capacity: parsed_env("BEACON_ENRICH_CAPACITY", 5_000),
            database_url: required_env("DATABASE_URL"),
            batch_size: parsed_env("BEACON_BATCH_SIZE", 1_000),
            bulk_timeout_secs: parsed_env("BEACON_BULK_TIMEOUT_SECS", 5),
            drain_timeout_secs: parsed_env("BEACON_DRAIN_TIMEOUT_SECS", 30),
            retry_delays_secs: list_env("BEACON_RETRY_DELAYS_SECS")
                .iter()
                .filter_map(|v| v.parse().ok())
                .collect::<Vec<u64>>()
                .if_empty(vec![1, 2, 4]),
            deadletter_dir: path_env("BEACON_DEADLETTER_DIR", "/var/lib/beacon/deadletter"),
            breaker_cooldown_secs: parsed_env("BEACON_BREAKER_COOLDOWN_SECS", 120),
            breaker_max_backoff_secs: parsed_env("BEACON_BREAKER_MAX_BACKOFF_SECS", 30),
            mmdb_path: env::var("BEACON_MMDB_PATH").ok().map(PathBuf::from),
            mmdb_asn_path: env::var("BEACON_MMDB_ASN_PATH").ok().map(PathBuf::from),
            ipapi_base_url: env::var("BEACON_IPAPI_BASE_URL")
                .unwrap_or_else(|_| "http://ip-api.com".to_string()),
            ipapi_key: env::var("BEACON_IPAPI_KEY").unwrap_or_default(),
            ipapi_per_minute: parsed_env("BEACON_IPAPI_PER_MINUTE", 30),
            whois_host: env::var("BEACON_WHOIS_HOST")
                .unwrap_or_else(|_| "whois.cymru.com:43".to_string()),
            session_timeout_secs: parsed_env("BEACON_SESSION_TIMEOUT_SECS", 600),
            cross_customer_window_secs: parsed_env("BEACON_CROSS_CUSTOMER_WINDOW_SECS", 24 * 3600),
            cloud_hostnames_path: env::var("BEACON_CLOUD_HOSTNAMES_PATH")
                .ok()
                .map(PathBuf::from),
            cultural_data_path: env::var("BEACON_CULTURAL_DATA_PATH").ok().map(PathBuf::from),
            gpu_tables_path: env::var("BEACON_GPU_TABLES_PATH").ok().map(PathBuf::from),
            ops_host: env::var("BEACON_OPS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            ops_port: parsed_env("BEACON_OPS_PORT", 8091),
            edge_queue_depth_url: env::var("BEACON_EDGE_QUEUE_DEPTH_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/internal/queue-depth".to_string()),
            probe_endpoints: list_env("BEACON_PROBE_ENDPOINTS"),
            etl_procedures: list_env("BEACON_ETL_PROCEDURES").if_empty(vec![
                "ingest.parse_raw".to_string(),
                "ingest.resolve_identity".to_string(),
            ]),
            etl_interval_secs: parsed_env("BEACON_ETL_INTERVAL_SECS", 60),
            log_dir: path_env("BEACON_LOG_DIR", "/var/log/beacon"),
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join(format!("{}.sock", self.pipe_name))
    }

    /// Log the presence and length of each sensitive value for debugging.
    pub fn log_redacted(&self) {
        let vars = [
            ("DATABASE_URL", &self.database_url),
            ("BEACON_IPAPI_KEY", &self.ipapi_key),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn path_env(key: &str, default: &str) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn list_env(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

trait IfEmpty {
    fn if_empty(self, fallback: Self) -> Self;
}

impl<T> IfEmpty for Vec<T> {
    fn if_empty(self, fallback: Self) -> Self {
        if self.is_empty() {
            fallback
        } else {
            self
        }
    }
}
