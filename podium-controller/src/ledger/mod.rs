//! Ledger access layer
//!
//! Typed access to the durable job table. The ledger owns no business logic,
//! only atomic read/write primitives: snapshot reads for the loop phases and
//! a single compare-and-set write primitive for status transitions.
//!
//! Trait-based so the reconciliation loop can be tested against an in-memory
//! implementation.

mod postgres;

pub use postgres::PgLedger;

use async_trait::async_trait;
use podium_core::domain::job::{Job, JobStatus};
use thiserror::Error;
use uuid::Uuid;

/// Errors from ledger operations
///
/// Every variant except `IllegalTransition` is transient from the loop's
/// point of view: the tick logs it and retries on the next interval.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
}

/// Columns written together with a status change
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub workload_name: Option<String>,
    pub artifact_path: Option<String>,
    pub error_message: Option<String>,
    pub log_excerpt: Option<String>,
    pub retry_count: Option<i32>,
}

/// Ledger operations the reconciliation loop depends on
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fetches rows awaiting admission, oldest-created first.
    ///
    /// Returns an empty vector when none exist; bounded by the pool's
    /// acquire timeout so a slow ledger cannot stall the tick forever.
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<Job>, LedgerError>;

    /// Fetches all rows with a live workload (queued or running).
    async fn fetch_in_flight(&self) -> Result<Vec<Job>, LedgerError>;

    /// Atomically moves a row from `from` to `to`, writing `fields` along
    /// with it, but only if the stored status still equals `from`.
    ///
    /// Returns whether the transition applied. A `false` return means a
    /// concurrent pass (e.g. after a crash-restart race) already moved the
    /// row; callers treat that as a no-op, never an error.
    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<bool, LedgerError>;

    /// Increments the consecutive unknown-state counter and returns the new
    /// value. Persisted so a controller restart cannot reset the safety
    /// valve arbitrarily.
    async fn mark_unobserved(&self, id: Uuid) -> Result<i32, LedgerError>;

    /// Zeroes the unknown-state counter after a recognized observation.
    async fn clear_unobserved(&self, id: Uuid) -> Result<(), LedgerError>;
}
