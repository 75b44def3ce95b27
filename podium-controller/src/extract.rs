//! Result extraction
//!
//! Locates the artifact a completed workload is expected to have written on
//! shared storage. Only existence, non-emptiness and readability are checked
//! here; the artifact's content semantics belong to the workload.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use podium_core::domain::job::FailureKind;
use podium_core::domain::outcome::{Artifact, Outcome};
use uuid::Uuid;

/// File name every workload must write on success
pub const ARTIFACT_FILE: &str = "submission.csv";

/// The artifact path is fully determined by the job identifier; this is the
/// contract the controller imposes on every workload.
pub fn artifact_path(root: &Path, id: Uuid) -> PathBuf {
    root.join(id.to_string()).join(ARTIFACT_FILE)
}

/// Probe for the job's result artifact.
///
/// Returns `None` unless a readable, non-empty regular file exists at the
/// derived path. A zero exit without an artifact is a failure, so absence
/// here is what separates "succeeded" from "ran but produced nothing".
pub fn probe_artifact(root: &Path, id: Uuid) -> Option<Artifact> {
    let path = artifact_path(root, id);
    let meta = std::fs::metadata(&path).ok()?;

    if !meta.is_file() || meta.len() == 0 {
        return None;
    }

    // Unknown mtime degrades to "now" so a deadline race resolves to timeout
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Some(Artifact {
        path: path.display().to_string(),
        size: meta.len(),
        modified,
    })
}

/// Success beats an expired deadline only if the artifact was fully written
/// before the deadline instant; otherwise the timeout wins.
pub fn beats_deadline(artifact: &Artifact, deadline_at: DateTime<Utc>) -> bool {
    artifact.modified <= deadline_at
}

/// Assemble the outcome for a workload that reported a clean exit.
///
/// Exit code alone is not sufficient evidence of a valid result: a zero exit
/// without the expected artifact is a failure, never success.
pub fn success_outcome(root: &Path, id: Uuid, log_excerpt: Option<String>) -> Outcome {
    match probe_artifact(root, id) {
        Some(artifact) => Outcome {
            success: true,
            artifact: Some(artifact),
            error: None,
            log_excerpt,
        },
        None => Outcome {
            success: false,
            artifact: None,
            error: Some(FailureKind::MissingArtifact.message("no submission.csv generated")),
            log_excerpt,
        },
    }
}

/// Assemble the outcome for a workload that failed.
pub fn failure_outcome(kind: FailureKind, detail: &str, log_excerpt: Option<String>) -> Outcome {
    Outcome {
        success: false,
        artifact: None,
        error: Some(kind.message(detail)),
        log_excerpt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_artifact_path_is_derived_from_id() {
        let id = Uuid::new_v4();
        let path = artifact_path(Path::new("/shared/submissions"), id);
        assert_eq!(
            path,
            PathBuf::from(format!("/shared/submissions/{id}/submission.csv"))
        );
    }

    #[test]
    fn test_probe_finds_written_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();

        let job_dir = dir.path().join(id.to_string());
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join(ARTIFACT_FILE), "id,label\n1,0\n").unwrap();

        let artifact = probe_artifact(dir.path(), id).unwrap();
        assert_eq!(artifact.size, 13);
        assert!(artifact.path.ends_with("submission.csv"));
    }

    #[test]
    fn test_probe_rejects_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        assert!(probe_artifact(dir.path(), Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_probe_rejects_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();

        let job_dir = dir.path().join(id.to_string());
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join(ARTIFACT_FILE), "").unwrap();

        assert!(probe_artifact(dir.path(), id).is_none());
    }

    #[test]
    fn test_probe_rejects_directory_at_artifact_path() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();

        std::fs::create_dir_all(artifact_path(dir.path(), id)).unwrap();

        assert!(probe_artifact(dir.path(), id).is_none());
    }

    #[test]
    fn test_success_outcome_requires_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();

        let missing = success_outcome(dir.path(), id, None);
        assert!(!missing.success);
        assert!(missing.error.unwrap().starts_with("missing artifact:"));

        let job_dir = dir.path().join(id.to_string());
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join(ARTIFACT_FILE), "id,label\n1,0\n").unwrap();

        let found = success_outcome(dir.path(), id, Some("done\n".to_string()));
        assert!(found.success);
        assert!(found.artifact.is_some());
        assert!(found.error.is_none());
        assert_eq!(found.log_excerpt.as_deref(), Some("done\n"));
    }

    #[test]
    fn test_tie_break_on_deadline() {
        let deadline_at = Utc::now();
        let artifact = |modified| Artifact {
            path: "submission.csv".to_string(),
            size: 1,
            modified,
        };

        let before = artifact(deadline_at - TimeDelta::seconds(1));
        assert!(beats_deadline(&before, deadline_at));

        let exactly = artifact(deadline_at);
        assert!(beats_deadline(&exactly, deadline_at));

        let after = artifact(deadline_at + TimeDelta::seconds(1));
        assert!(!beats_deadline(&after, deadline_at));
    }
}
