pub mod config;
pub mod error;
pub mod query;
pub mod record;
pub mod shutdown;

pub use config::{EdgeConfig, ForgeConfig};
pub use error::{BeaconError, Result};
pub use record::CaptureRecord;
pub use shutdown::{Shutdown, ShutdownSignal};

/// Default name shared by the pipe client and the pipe server.
pub const DEFAULT_PIPE_NAME: &str = "SmartPiXL-Enrichment";

/// Query-string key prefix for server-appended enrichment tokens.
pub const SRV_PREFIX: &str = "_srv_";
