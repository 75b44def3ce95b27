//! Workload sizing policy
//!
//! Pure, deterministic computation of the concrete workload spec from a job
//! descriptor plus configured defaults. Called by the admission phase and
//! re-evaluated by the sync phase (same inputs, same deadline) so the loop
//! never has to persist derived values.

use std::time::Duration;

use podium_core::domain::job::Job;

use crate::cluster::WorkloadSpec;

/// Bounds and defaults for workload sizing
#[derive(Debug, Clone)]
pub struct PolicyDefaults {
    pub cpu_min_millis: u32,
    pub cpu_max_millis: u32,
    pub memory_min_mb: u32,
    pub memory_max_mb: u32,
    /// Limits are this multiple of the clamped requests
    pub limit_multiplier: f64,
    pub default_deadline: Duration,
    pub min_deadline: Duration,
    pub max_deadline: Duration,
    /// Cluster-level pod retry budget per workload
    pub retry_budget: i32,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            cpu_min_millis: 250,
            cpu_max_millis: 8000,
            memory_min_mb: 512,
            memory_max_mb: 32768,
            limit_multiplier: 2.0,
            default_deadline: Duration::from_secs(7200),
            min_deadline: Duration::from_secs(60),
            max_deadline: Duration::from_secs(21600),
            retry_budget: 2,
        }
    }
}

impl PolicyDefaults {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cpu_min_millis == 0 || self.cpu_min_millis > self.cpu_max_millis {
            anyhow::bail!("cpu bounds must satisfy 0 < min <= max");
        }

        if self.memory_min_mb == 0 || self.memory_min_mb > self.memory_max_mb {
            anyhow::bail!("memory bounds must satisfy 0 < min <= max");
        }

        if self.limit_multiplier < 1.0 {
            anyhow::bail!("limit_multiplier must be at least 1.0");
        }

        if self.min_deadline > self.max_deadline {
            anyhow::bail!("deadline bounds must satisfy min <= max");
        }

        if self.retry_budget < 0 {
            anyhow::bail!("retry_budget cannot be negative");
        }

        Ok(())
    }
}

/// Compute the concrete workload spec for a job.
///
/// Requested resources are clamped into the configured bounds, limits are a
/// fixed multiple of the clamped requests, and the deadline comes from
/// configuration unless the job carries an override (itself clamped into the
/// allowed range).
pub fn desired_spec(job: &Job, defaults: &PolicyDefaults) -> WorkloadSpec {
    let cpu_millis = job
        .resources
        .cpu_millis
        .clamp(defaults.cpu_min_millis, defaults.cpu_max_millis);
    let memory_mb = job
        .resources
        .memory_mb
        .clamp(defaults.memory_min_mb, defaults.memory_max_mb);

    WorkloadSpec {
        cpu_millis,
        cpu_limit_millis: scale(cpu_millis, defaults.limit_multiplier),
        memory_mb,
        memory_limit_mb: scale(memory_mb, defaults.limit_multiplier),
        gpus: job.resources.gpus,
        deadline: deadline_for(job, defaults),
        retry_budget: defaults.retry_budget,
    }
}

fn deadline_for(job: &Job, defaults: &PolicyDefaults) -> Duration {
    match job.timeout_secs {
        Some(secs) if secs > 0 => {
            let requested = Duration::from_secs(secs as u64);
            requested.clamp(defaults.min_deadline, defaults.max_deadline)
        }
        _ => defaults.default_deadline,
    }
}

fn scale(value: u32, multiplier: f64) -> u32 {
    (value as f64 * multiplier).round() as u32
}
