//! Postgres ledger
//!
//! Handles all database operations on the job table. The compare-and-set
//! transition is a single conditional UPDATE, which is what makes the
//! single-writer reconciliation design safe across crash-restart races.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podium_core::domain::job::{Job, JobStatus, ResourceProfile};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Ledger, LedgerError, TransitionFields};

const JOB_COLUMNS: &str = r#"
    id, source_url, competition, status, workload_name,
    created_at, queued_at, started_at, completed_at,
    cpu_millis, memory_mb, gpus, timeout_secs,
    artifact_path, error_message, log_excerpt,
    retry_count, unobserved_ticks, cancel_requested
"#;

/// Ledger backed by the shared Postgres job table
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<Job>, LedgerError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn fetch_in_flight(&self) -> Result<Vec<Job>, LedgerError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status IN ('queued', 'running')
            ORDER BY created_at ASC
            "#,
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<bool, LedgerError> {
        if !JobStatus::can_transition(from, to) {
            return Err(LedgerError::IllegalTransition { from, to });
        }

        let now = Utc::now();

        // The WHERE clause carries the optimistic concurrency check; the
        // CASE/COALESCE expressions keep each timestamp set-at-most-once.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $3,
                queued_at = CASE WHEN $3 = 'queued'
                    THEN COALESCE(queued_at, $4) ELSE queued_at END,
                started_at = CASE WHEN $3 = 'running'
                    THEN COALESCE(started_at, $4) ELSE started_at END,
                completed_at = CASE WHEN $3 IN ('succeeded', 'failed')
                    THEN COALESCE(completed_at, $4) ELSE completed_at END,
                workload_name = COALESCE(workload_name, $5),
                artifact_path = COALESCE($6, artifact_path),
                error_message = COALESCE($7, error_message),
                log_excerpt = COALESCE($8, log_excerpt),
                retry_count = COALESCE($9, retry_count)
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(status_to_string(from))
        .bind(status_to_string(to))
        .bind(now)
        .bind(fields.workload_name)
        .bind(fields.artifact_path)
        .bind(fields.error_message)
        .bind(fields.log_excerpt)
        .bind(fields.retry_count)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_unobserved(&self, id: Uuid) -> Result<i32, LedgerError> {
        let ticks: i32 = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET unobserved_ticks = unobserved_ticks + 1
            WHERE id = $1
            RETURNING unobserved_ticks
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ticks)
    }

    async fn clear_unobserved(&self, id: Uuid) -> Result<(), LedgerError> {
        sqlx::query("UPDATE jobs SET unobserved_ticks = 0 WHERE id = $1 AND unobserved_ticks <> 0")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Succeeded => "succeeded",
        JobStatus::Failed => "failed",
    }
}

fn string_to_status(s: &str) -> JobStatus {
    match s {
        "pending" => JobStatus::Pending,
        "queued" => JobStatus::Queued,
        "running" => JobStatus::Running,
        "succeeded" => JobStatus::Succeeded,
        // Unknown strings park the row terminally rather than re-admitting it
        _ => JobStatus::Failed,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    source_url: String,
    competition: Option<String>,
    status: String,
    workload_name: Option<String>,
    created_at: DateTime<Utc>,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cpu_millis: i32,
    memory_mb: i32,
    gpus: i32,
    timeout_secs: Option<i64>,
    artifact_path: Option<String>,
    error_message: Option<String>,
    log_excerpt: Option<String>,
    retry_count: i32,
    unobserved_ticks: i32,
    cancel_requested: bool,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            source_url: row.source_url,
            competition: row.competition,
            status: string_to_status(&row.status),
            workload_name: row.workload_name,
            created_at: row.created_at,
            queued_at: row.queued_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            resources: ResourceProfile {
                cpu_millis: row.cpu_millis.max(0) as u32,
                memory_mb: row.memory_mb.max(0) as u32,
                gpus: row.gpus.max(0) as u32,
            },
            timeout_secs: row.timeout_secs,
            artifact_path: row.artifact_path,
            error_message: row.error_message,
            log_excerpt: row.log_excerpt,
            retry_count: row.retry_count,
            unobserved_ticks: row.unobserved_ticks,
            cancel_requested: row.cancel_requested,
        }
    }
}
