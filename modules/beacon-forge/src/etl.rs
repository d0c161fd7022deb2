//! Periodic ETL kick.
//!
//! The warehouse owns parsing, dimension upserts, and identity resolution;
//! this task just invokes its stored procedures on a fixed schedule so the
//! downstream watermarks keep advancing.

use std::time::Duration;

use tracing::{debug, info, warn};

use beacon_common::ShutdownSignal;
use beacon_warehouse::WarehouseClient;

pub struct EtlKicker {
    warehouse: WarehouseClient,
    procedures: Vec<String>,
    interval: Duration,
    shutdown: ShutdownSignal,
}

impl EtlKicker {
    pub fn new(
        warehouse: WarehouseClient,
        procedures: Vec<String>,
        interval_secs: u64,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            warehouse,
            procedures,
            interval: Duration::from_secs(interval_secs.max(1)),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        if self.procedures.is_empty() {
            info!("No ETL procedures configured");
            return;
        }
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.recv() => break,
            }
            self.kick().await;
        }
        info!("ETL kicker stopped");
    }

    async fn kick(&self) {
        for procedure in &self.procedures {
            match self.warehouse.run_procedure(procedure).await {
                Ok(()) => debug!(procedure, "ETL procedure completed"),
                Err(e) => warn!(procedure, error = %e, "ETL procedure failed"),
            }
        }
    }
}
