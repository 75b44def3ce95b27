//! Retirement phase
//!
//! Reclaims cluster capacity held by terminal workloads older than the
//! retention window. Only the cluster objects are deleted; ledger rows are
//! never touched, so historical status stays queryable.

use chrono::{TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::cluster::ClusterError;

use super::Reconciler;

impl Reconciler {
    /// Deletes terminal workloads whose completion is older than the
    /// retention window. Returns the number reclaimed.
    pub async fn retire_expired(&self) -> Result<usize, ClusterError> {
        let retention =
            TimeDelta::from_std(self.config.retention).unwrap_or_else(|_| TimeDelta::hours(24));
        let cutoff = Utc::now() - retention;

        let terminated = self.cluster.list_terminated().await?;

        let mut retired = 0;

        for workload in terminated {
            // Workloads without a completion timestamp are left alone
            let Some(finished_at) = workload.finished_at else {
                continue;
            };

            if finished_at > cutoff {
                continue;
            }

            match self.cluster.delete(&workload.name).await {
                Ok(()) => {
                    debug!(workload = %workload.name, "Retired workload");
                    retired += 1;
                }
                Err(e) => {
                    warn!(workload = %workload.name, "Failed to retire workload: {}", e);
                }
            }
        }

        if retired > 0 {
            info!("Retired {} expired workload(s)", retired);
        }

        Ok(retired)
    }
}
