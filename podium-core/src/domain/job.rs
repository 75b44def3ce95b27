//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable job record
///
/// One row per submitted competition job. Created by the API gateway with
/// status `Pending`; mutated exclusively by the controller afterwards, and
/// only through its compare-and-set `transition` primitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Competition page the agent workload should solve
    pub source_url: String,
    /// Display name parsed from the URL by the API gateway
    pub competition: Option<String>,
    pub status: JobStatus,
    /// Cluster workload name, assigned once at admission and immutable after
    pub workload_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub resources: ResourceProfile,
    /// Per-job deadline override in seconds, clamped by policy
    pub timeout_secs: Option<i64>,
    pub artifact_path: Option<String>,
    pub error_message: Option<String>,
    pub log_excerpt: Option<String>,
    /// Cluster-observed pod retries, recorded at the terminal transition
    pub retry_count: i32,
    /// Consecutive ticks the workload state could not be determined
    pub unobserved_ticks: i32,
    /// Set by the API gateway; honored by the controller at tick granularity
    pub cancel_requested: bool,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Job lifecycle status
///
/// `Pending` rows are waiting for admission; `Queued` and `Running` rows have
/// a live cluster workload; `Succeeded` and `Failed` are terminal and never
/// mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Whether `from -> to` is a legal edge of the lifecycle state machine.
    ///
    /// Success is only reachable through `Running`; failure is reachable from
    /// every non-terminal state. Terminal states have no outgoing edges.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (from, to),
            (Pending, Queued)
                | (Pending, Failed)
                | (Queued, Running)
                | (Queued, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

/// Requested compute for a single workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub cpu_millis: u32,
    pub memory_mb: u32,
    pub gpus: u32,
}

impl Default for ResourceProfile {
    fn default() -> Self {
        // 1 CPU / 2Gi, sized for local single-node clusters
        Self {
            cpu_millis: 1000,
            memory_mb: 2048,
            gpus: 0,
        }
    }
}

/// Why a job ended up `Failed`
///
/// Every failed row carries a human-readable `error_message` prefixed with
/// one of these, so operators can tell "ran but produced nothing" apart from
/// "crashed" or "was never observed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The cluster refused to admit the workload (quota, validation)
    Rejected,
    /// The workload ran and exited non-zero after the cluster retry budget
    Execution,
    /// The configured deadline elapsed before a result was produced
    Timeout,
    /// The workload exited zero without writing its result artifact
    MissingArtifact,
    /// The workload state could not be determined for too many ticks
    Unobservable,
    /// An external cancellation request was honored
    Cancelled,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Rejected => "rejected",
            FailureKind::Execution => "execution failure",
            FailureKind::Timeout => "timeout",
            FailureKind::MissingArtifact => "missing artifact",
            FailureKind::Unobservable => "unobservable",
            FailureKind::Cancelled => "cancelled",
        }
    }

    /// Compose the operator-facing error message for a failed row.
    pub fn message(self, detail: &str) -> String {
        if detail.is_empty() {
            self.as_str().to_string()
        } else {
            format!("{}: {}", self.as_str(), detail)
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the cluster workload name for a job.
///
/// Purely a function of the job identifier so that admission is naturally
/// idempotent: re-creating the workload for the same job collides on the same
/// name instead of producing a duplicate.
pub fn workload_name(id: Uuid) -> String {
    format!("job-{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use JobStatus::*;
        assert!(JobStatus::can_transition(Pending, Queued));
        assert!(JobStatus::can_transition(Pending, Failed));
        assert!(JobStatus::can_transition(Queued, Running));
        assert!(JobStatus::can_transition(Queued, Failed));
        assert!(JobStatus::can_transition(Running, Succeeded));
        assert!(JobStatus::can_transition(Running, Failed));
    }

    #[test]
    fn test_success_only_from_running() {
        use JobStatus::*;
        assert!(!JobStatus::can_transition(Pending, Succeeded));
        assert!(!JobStatus::can_transition(Queued, Succeeded));
    }

    #[test]
    fn test_no_skipping_queued() {
        use JobStatus::*;
        assert!(!JobStatus::can_transition(Pending, Running));
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        use JobStatus::*;
        for from in [Succeeded, Failed] {
            for to in [Pending, Queued, Running, Succeeded, Failed] {
                assert!(!JobStatus::can_transition(from, to));
            }
        }
    }

    #[test]
    fn test_no_regression() {
        use JobStatus::*;
        assert!(!JobStatus::can_transition(Running, Queued));
        assert!(!JobStatus::can_transition(Queued, Pending));
        assert!(!JobStatus::can_transition(Running, Pending));
    }

    #[test]
    fn test_workload_name_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(workload_name(id), workload_name(id));
        assert_eq!(workload_name(id), format!("job-{id}"));
    }

    #[test]
    fn test_failure_message_carries_kind_prefix() {
        let msg = FailureKind::Timeout.message("exceeded deadline of 7200s");
        assert_eq!(msg, "timeout: exceeded deadline of 7200s");
        assert_eq!(FailureKind::Unobservable.message(""), "unobservable");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let s = serde_json::to_string(&JobStatus::Succeeded).unwrap();
        assert_eq!(s, "\"succeeded\"");
    }
}
