//! Sync phase
//!
//! Follows every in-flight row to its workload's observed state: promotes
//! queued rows when a pod starts, extracts results from terminal workloads,
//! enforces the wall-clock deadline, honors cancellation requests, and
//! forces rows whose workload cannot be observed for too long into a
//! terminal state so nothing stays queued or running forever.

use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use podium_core::domain::job::{FailureKind, Job, JobStatus, workload_name};
use podium_core::domain::outcome::Outcome;
use tracing::{debug, error, info, warn};

use crate::cluster::{WorkloadBackend, WorkloadState};
use crate::config::Config;
use crate::extract;
use crate::ledger::{Ledger, LedgerError, TransitionFields};
use crate::policy;

use super::Reconciler;

impl Reconciler {
    /// Syncs all queued/running rows against the cluster.
    ///
    /// Returns the number of applied transitions.
    pub async fn sync_in_flight(&self) -> Result<usize, LedgerError> {
        let jobs = self.ledger.fetch_in_flight().await?;

        if jobs.is_empty() {
            return Ok(0);
        }

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

                match sync_one(ledger, cluster, &config, job).await {
                    Ok(transitioned) => transitioned,
                    Err(e) => {
                        // Transient; the next tick re-derives and retries
                        error!(job = %id, "Sync failed: {:#}", e);
                        false
                    }
                }
            }));
        }

        let mut synced = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) => warn!("Sync task panicked: {}", e),
            }
        }

        Ok(synced)
    }
}

/// Syncs a single in-flight row against its workload.
async fn sync_one(
    ledger: Arc<dyn Ledger>,
    cluster: Arc<dyn WorkloadBackend>,
    config: &Config,
    job: Job,
) -> Result<bool> {
    let name = job
        .workload_name
        .clone()
        .unwrap_or_else(|| workload_name(job.id));

    // Cancellation is observed at tick granularity: terminate, then record
    if job.cancel_requested {
        info!(job = %job.id, "Cancellation requested, terminating workload");
        cluster.delete(&name).await?;
        let fields = fail_fields(FailureKind::Cancelled, "cancelled by user");
        return Ok(ledger
            .transition(job.id, job.status, JobStatus::Failed, fields)
            .await?);
    }

    let spec = policy::desired_spec(&job, &config.policy);

    // A workload stuck before its first pod still counts against the clock,
    // so queued rows are measured from their admission time
    let deadline_anchor = match job.status {
        JobStatus::Running => job.started_at,
        _ => job.queued_at,
    }
    .unwrap_or(job.created_at);
    let deadline_at = deadline_anchor + TimeDelta::from_std(spec.deadline)?;
    let expired = Utc::now() > deadline_at;

    let state = match cluster.state(&name).await {
        Ok(state) => state,
        Err(e) if e.is_not_found() => {
            return unobserved(&ledger, &cluster, config, &job, &name, "workload not found").await;
        }
        // Transient; leave the row as-is for the next tick
        Err(e) => return Err(e.into()),
    };

    if job.unobserved_ticks > 0 && state != WorkloadState::Unknown {
        ledger.clear_unobserved(job.id).await?;
    }

    match state {
        WorkloadState::Succeeded => {
            // The pod may have finished before we ever saw it start; success
            // is still only reachable through running
            let current = ensure_running(&ledger, &job).await?;

            let excerpt = log_excerpt(cluster.as_ref(), &name, config).await;
            let outcome = extract::success_outcome(&config.artifact_root, job.id, excerpt);

            // Completion racing the deadline: success stands only if the
            // artifact was fully written before the deadline instant
            let beats = outcome
                .artifact
                .as_ref()
                .is_some_and(|a| extract::beats_deadline(a, deadline_at));
            if expired && !beats {
                return timeout(&ledger, &cluster, &job, current, &name, &spec).await;
            }

            let succeeded = outcome.success;
            let artifact = outcome.artifact.as_ref().map(|a| a.path.clone());
            let to = if succeeded {
                JobStatus::Succeeded
            } else {
                warn!(job = %job.id, "Workload exited clean but produced no artifact");
                JobStatus::Failed
            };

            let applied = ledger
                .transition(job.id, current, to, outcome_fields(outcome, None))
                .await?;
            if applied && succeeded {
                info!(job = %job.id, artifact = %artifact.unwrap_or_default(), "Job succeeded");
            }
            Ok(applied)
        }

        WorkloadState::Failed {
            message,
            pod_failures,
        } => {
            warn!(job = %job.id, "Workload failed: {}", message);
            let excerpt = log_excerpt(cluster.as_ref(), &name, config).await;
            let outcome = extract::failure_outcome(FailureKind::Execution, &message, excerpt);
            // Queued rows take the direct queued -> failed edge
            Ok(ledger
                .transition(
                    job.id,
                    job.status,
                    JobStatus::Failed,
                    outcome_fields(outcome, Some(pod_failures)),
                )
                .await?)
        }

        WorkloadState::Active => {
            if expired {
                return timeout(&ledger, &cluster, &job, job.status, &name, &spec).await;
            }

            if job.status == JobStatus::Queued {
                let applied = ledger
                    .transition(
                        job.id,
                        JobStatus::Queued,
                        JobStatus::Running,
                        TransitionFields::default(),
                    )
                    .await?;
                if applied {
                    info!(job = %job.id, "Job running");
                }
                Ok(applied)
            } else {
                Ok(false)
            }
        }

        WorkloadState::Pending => {
            if expired {
                return timeout(&ledger, &cluster, &job, job.status, &name, &spec).await;
            }
            Ok(false)
        }

        WorkloadState::Unknown => {
            unobserved(&ledger, &cluster, config, &job, &name, "unrecognized workload state").await
        }
    }
}

/// Promote a queued row through running so terminal transitions always take
/// the running edge. Returns the status subsequent transitions start from.
async fn ensure_running(ledger: &Arc<dyn Ledger>, job: &Job) -> Result<JobStatus, LedgerError> {
    if job.status == JobStatus::Queued {
        ledger
            .transition(
                job.id,
                JobStatus::Queued,
                JobStatus::Running,
                TransitionFields::default(),
            )
            .await?;
    }
    Ok(JobStatus::Running)
}

/// Force-terminate an expired workload and record the timeout.
async fn timeout(
    ledger: &Arc<dyn Ledger>,
    cluster: &Arc<dyn WorkloadBackend>,
    job: &Job,
    from: JobStatus,
    name: &str,
    spec: &crate::cluster::WorkloadSpec,
) -> Result<bool> {
    warn!(job = %job.id, workload = %name, "Deadline exceeded, terminating workload");
    cluster.delete(name).await?;

    let detail = format!("exceeded deadline of {}s", spec.deadline.as_secs());
    let fields = fail_fields(FailureKind::Timeout, &detail);
    Ok(ledger
        .transition(job.id, from, JobStatus::Failed, fields)
        .await?)
}

/// Track a row whose workload state cannot be determined; after the
/// configured number of consecutive ticks it is forced to failed so nothing
/// stays in-flight forever.
async fn unobserved(
    ledger: &Arc<dyn Ledger>,
    cluster: &Arc<dyn WorkloadBackend>,
    config: &Config,
    job: &Job,
    name: &str,
    reason: &str,
) -> Result<bool> {
    let ticks = ledger.mark_unobserved(job.id).await?;

    if ticks < config.max_unobserved_ticks {
        debug!(job = %job.id, ticks, "Workload state unknown: {}", reason);
        return Ok(false);
    }

    warn!(job = %job.id, ticks, "Workload unobservable for too long, giving up");
    cluster.delete(name).await?;

    let detail = format!("{reason} for {ticks} consecutive ticks");
    let fields = fail_fields(FailureKind::Unobservable, &detail);
    Ok(ledger
        .transition(job.id, job.status, JobStatus::Failed, fields)
        .await?)
}

/// Fold an outcome into the columns its terminal transition writes.
fn outcome_fields(outcome: Outcome, retry_count: Option<i32>) -> TransitionFields {
    TransitionFields {
        artifact_path: outcome.artifact.map(|a| a.path),
        error_message: outcome.error,
        log_excerpt: outcome.log_excerpt,
        retry_count,
        ..Default::default()
    }
}

fn fail_fields(kind: FailureKind, detail: &str) -> TransitionFields {
    outcome_fields(extract::failure_outcome(kind, detail, None), None)
}

/// Best-effort pod log tail; failure to read logs never fails a sync.
async fn log_excerpt(
    cluster: &dyn WorkloadBackend,
    name: &str,
    config: &Config,
) -> Option<String> {
    match cluster.logs(name, config.log_excerpt_bytes).await {
        Ok(logs) if !logs.is_empty() => Some(logs),
        Ok(_) => None,
        Err(e) => {
            debug!(workload = %name, "Could not fetch log excerpt: {}", e);
            None
        }
    }
}
