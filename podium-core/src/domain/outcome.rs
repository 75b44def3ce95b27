//! Terminal workload outcome

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result artifact produced by a completed workload
///
/// The controller only verifies existence, non-emptiness and readability;
/// the artifact's content semantics belong to the workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub size: u64,
    /// Filesystem modification time, used to break the race between a
    /// workload completing and its deadline expiring in the same tick
    pub modified: DateTime<Utc>,
}

/// Normalized result of a terminal workload
///
/// Ephemeral: produced by the result extractor and immediately folded into
/// the job row. An artifact is present only on success.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    pub artifact: Option<Artifact>,
    pub error: Option<String>,
    pub log_excerpt: Option<String>,
}
