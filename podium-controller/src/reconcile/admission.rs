//! Admission phase
//!
//! Turns pending ledger rows into cluster workloads. The workload name is
//! derived purely from the job identifier, so creation is naturally
//! idempotent: a pass that crashed after creating the workload but before
//! writing the ledger re-syncs on the next tick by treating already-exists
//! as success.

use std::sync::Arc;

use anyhow::Result;
use podium_core::domain::job::{FailureKind, Job, JobStatus, workload_name};
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterError, WorkloadBackend};
use crate::config::Config;
use crate::ledger::{Ledger, LedgerError, TransitionFields};
use crate::policy;

use super::Reconciler;

impl Reconciler {
    /// Admits pending rows up to the configured batch limit, processing
    /// records in parallel under the shared concurrency bound.
    ///
    /// Returns the number of applied transitions.
    pub async fn admit_pending(&self) -> Result<usize, LedgerError> {
        let jobs = self
            .ledger
            .fetch_pending(self.config.pending_batch_limit)
            .await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        info!("Found {} pending job(s)", jobs.len());

        let mut handles = Vec::new();

        for job in jobs {
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };

            let ledger = Arc::clone(&self.ledger);
            let cluster = Arc::clone(&self.cluster);
            let config = Arc::clone(&self.config);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let id = job.id;

                match admit_one(ledger, cluster, &config, job).await {
                    Ok(admitted) => admitted,
                    Err(e) => {
                        // Row stays pending; the next tick retries
                        error!(job = %id, "Admission failed: {:#}", e);
                        false
                    }
                }
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => admitted += 1,
                Ok(false) => {}
                Err(e) => warn!("Admission task panicked: {}", e),
            }
        }

        Ok(admitted)
    }
}

/// Admits a single pending row.
async fn admit_one(
    ledger: Arc<dyn Ledger>,
    cluster: Arc<dyn WorkloadBackend>,
    config: &Config,
    job: Job,
) -> Result<bool> {
    let name = workload_name(job.id);

    // Cancelled before a workload ever existed
    if job.cancel_requested {
        let fields = TransitionFields {
            workload_name: Some(name),
            error_message: Some(FailureKind::Cancelled.message("cancelled before admission")),
            ..Default::default()
        };
        ledger
            .transition(job.id, JobStatus::Pending, JobStatus::Failed, fields)
            .await?;
        return Ok(false);
    }

    let spec = policy::desired_spec(&job, &config.policy);

    match cluster.create(&name, &job, &spec).await {
        Ok(()) => {
            info!(job = %job.id, workload = %name, "Created workload");
        }
        Err(e) if e.is_already_exists() => {
            // A prior pass crashed between create and the ledger write;
            // fall through to the same transition instead of duplicating
            debug!(job = %job.id, workload = %name, "Workload already exists, re-syncing ledger");
        }
        Err(ClusterError::Rejected(reason)) => {
            warn!(job = %job.id, "Workload rejected by the cluster: {}", reason);
            let fields = TransitionFields {
                workload_name: Some(name),
                error_message: Some(FailureKind::Rejected.message(&reason)),
                ..Default::default()
            };
            ledger
                .transition(job.id, JobStatus::Pending, JobStatus::Failed, fields)
                .await?;
            return Ok(false);
        }
        // Transient: leave the row pending for the next tick
        Err(e) => return Err(e.into()),
    }

    let fields = TransitionFields {
        workload_name: Some(name),
        ..Default::default()
    };
    let applied = ledger
        .transition(job.id, JobStatus::Pending, JobStatus::Queued, fields)
        .await?;

    if !applied {
        debug!(job = %job.id, "Queued transition already applied by a concurrent pass");
    }

    Ok(applied)
}
