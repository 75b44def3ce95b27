//! Reconciliation loop
//!
//! The controller core. On a fixed interval it re-derives all state from the
//! two authoritative sources (job ledger, cluster) and drives transitions:
//!
//! 1. Admission: pending rows become cluster workloads, idempotently
//! 2. Sync: in-flight rows follow their workload to running or terminal
//! 3. Retirement: terminal workloads past retention are reclaimed
//!
//! No in-memory state survives across ticks except counters; a crash mid-tick
//! is recovered by the next tick re-reading both sources. One record's
//! failure is isolated and logged, never aborting the tick for the rest.

mod admission;
mod retire;
mod sync;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::time;
use tracing::{debug, error, info};

use crate::cluster::WorkloadBackend;
use crate::config::Config;
use crate::ledger::Ledger;

/// The reconciliation loop driver
///
/// Single writer of every job row after creation. Running more than one
/// instance is unsupported without leader election; the optimistic ledger
/// transition only has to absorb crash-restart races.
pub struct Reconciler {
    ledger: Arc<dyn Ledger>,
    cluster: Arc<dyn WorkloadBackend>,
    config: Arc<Config>,
    semaphore: Arc<Semaphore>,
}

impl Reconciler {
    pub fn new(config: Config, ledger: Arc<dyn Ledger>, cluster: Arc<dyn WorkloadBackend>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_records));
        Self {
            ledger,
            cluster,
            config: Arc::new(config),
            semaphore,
        }
    }

    /// Runs the loop until the task is dropped.
    ///
    /// A failed tick is logged and retried on the next interval; ledger or
    /// cluster unavailability never crashes the controller.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting reconciliation loop (interval: {:?})",
            self.config.tick_interval
        );

        let mut interval = time::interval(self.config.tick_interval);
        let mut iteration: u64 = 0;

        loop {
            interval.tick().await;
            iteration += 1;

            debug!(iteration, "Reconcile tick");

            if let Err(e) = self.tick(iteration).await {
                error!("Reconcile tick failed: {:#}", e);
            }
        }
    }

    /// Performs a single reconciliation pass.
    pub async fn tick(&self, iteration: u64) -> Result<()> {
        let admitted = self
            .admit_pending()
            .await
            .context("admission phase failed")?;

        let synced = self.sync_in_flight().await.context("sync phase failed")?;

        if iteration % self.config.retire_every_ticks == 0 {
            self.retire_expired()
                .await
                .context("retirement phase failed")?;
        }

        if admitted > 0 || synced > 0 {
            info!(admitted, synced, "Applied transitions this tick");
        }

        Ok(())
    }
}
