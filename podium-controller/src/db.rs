use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            source_url TEXT NOT NULL,
            competition VARCHAR(255),
            status VARCHAR(20) NOT NULL DEFAULT 'pending',
            workload_name VARCHAR(255) UNIQUE,
            created_at TIMESTAMPTZ NOT NULL,
            queued_at TIMESTAMPTZ,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            cpu_millis INTEGER NOT NULL DEFAULT 1000,
            memory_mb INTEGER NOT NULL DEFAULT 2048,
            gpus INTEGER NOT NULL DEFAULT 0,
            timeout_secs BIGINT,
            artifact_path TEXT,
            error_message TEXT,
            log_excerpt TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            unobserved_ticks INTEGER NOT NULL DEFAULT 0,
            cancel_requested BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for the reconciliation queries
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_workload_name ON jobs(workload_name)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
