//! Job DTOs for the API gateway

use serde::{Deserialize, Serialize};

use crate::domain::job::ResourceProfile;

/// Request to submit a new competition job
///
/// Produced by the API gateway; the controller requires the resulting ledger
/// row to carry a unique identifier and status `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub source_url: String,
    pub resources: Option<ResourceProfile>,
    /// Optional deadline override in seconds, clamped by controller policy
    pub timeout_secs: Option<i64>,
}
