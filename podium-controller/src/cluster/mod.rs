//! Cluster workload access
//!
//! Wraps the cluster control plane for everything the reconciliation loop
//! needs: create a namespaced batch workload from a job descriptor, observe
//! its state, fetch a bounded log tail, and delete it. The loop never caches
//! any of this; workload state is re-read on every tick.
//!
//! Trait-based so the loop can be tested against an in-memory cluster.

pub mod manifest;

mod kube;
mod retry;

pub use kube::KubeWorkloads;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podium_core::domain::job::Job;
use std::time::Duration;
use thiserror::Error;

/// Errors from cluster operations
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A workload with this name already exists. Non-fatal: deterministic
    /// naming makes this the normal signal of an already-admitted job.
    #[error("workload already exists")]
    AlreadyExists,

    /// The workload does not exist
    #[error("workload not found")]
    NotFound,

    /// The control plane refused the workload (quota, validation)
    #[error("workload rejected by the cluster: {0}")]
    Rejected(String),

    /// Transient control-plane failure; retried next tick
    #[error("cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Whether a retry with backoff could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Api(_))
    }
}

/// Observed state of a cluster workload, derived fresh every tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadState {
    /// Created but no pod has started yet
    Pending,
    /// At least one pod is running
    Active,
    /// The workload completed with a zero exit
    Succeeded,
    /// The workload failed after exhausting the cluster's own retry budget
    Failed {
        message: String,
        /// Pods the cluster burned on this workload
        pod_failures: i32,
    },
    /// The workload exists but its state is unrecognizable
    Unknown,
}

/// Concrete workload sizing computed by the policy engine
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub cpu_millis: u32,
    pub cpu_limit_millis: u32,
    pub memory_mb: u32,
    pub memory_limit_mb: u32,
    pub gpus: u32,
    /// Wall-clock deadline enforced by the reconciliation loop
    pub deadline: Duration,
    /// Cluster-level pod retry budget (backoff limit)
    pub retry_budget: i32,
}

/// A terminal workload still occupying cluster capacity
#[derive(Debug, Clone)]
pub struct RetiredWorkload {
    pub name: String,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Cluster operations the reconciliation loop depends on
#[async_trait]
pub trait WorkloadBackend: Send + Sync {
    /// Creates the workload for `job` under the given deterministic name.
    ///
    /// Fails with `AlreadyExists` when a prior pass already admitted this
    /// job, or `Rejected` when the control plane refuses the manifest.
    async fn create(&self, name: &str, job: &Job, spec: &WorkloadSpec) -> Result<(), ClusterError>;

    /// Observes the workload's current state. `NotFound` is an error so the
    /// caller can distinguish "missing" from any recognized state.
    async fn state(&self, name: &str) -> Result<WorkloadState, ClusterError>;

    /// Fetches a best-effort log tail from the workload's newest pod,
    /// truncated to `max_bytes`. Never blocks indefinitely.
    async fn logs(&self, name: &str, max_bytes: i64) -> Result<String, ClusterError>;

    /// Deletes the workload and its pods. Idempotent: deleting a missing
    /// workload is success.
    async fn delete(&self, name: &str) -> Result<(), ClusterError>;

    /// Lists managed workloads that reached a terminal state, for the
    /// retirement phase.
    async fn list_terminated(&self) -> Result<Vec<RetiredWorkload>, ClusterError>;
}
