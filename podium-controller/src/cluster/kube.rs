//! Kubernetes workload backend
//!
//! Implements the workload contract over the batch API: namespaced Job
//! objects labeled as managed by this controller, with pod logs read through
//! the core API. Every call carries a short timeout and bounded backoff for
//! transient control-plane failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job as BatchJob, JobStatus as BatchJobStatus};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use podium_core::domain::job::Job;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;

use super::{manifest, ClusterError, RetiredWorkload, RetryPolicy, WorkloadBackend, WorkloadSpec, WorkloadState};

/// Workload backend talking to the cluster control plane
pub struct KubeWorkloads {
    jobs: Api<BatchJob>,
    pods: Api<Pod>,
    namespace: String,
    agent_image: String,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl KubeWorkloads {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            jobs: Api::namespaced(client.clone(), &config.namespace),
            pods: Api::namespaced(client, &config.namespace),
            namespace: config.namespace.clone(),
            agent_image: config.agent_image.clone(),
            call_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Bound a single control-plane call so no tick can hang on the network
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, ClusterError>>,
    ) -> Result<T, ClusterError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Api(format!(
                "call timed out after {:?}",
                self.call_timeout
            ))),
        }
    }
}

#[async_trait]
impl WorkloadBackend for KubeWorkloads {
    async fn create(&self, name: &str, job: &Job, spec: &WorkloadSpec) -> Result<(), ClusterError> {
        let workload = manifest::build_workload(job, name, spec, &self.namespace, &self.agent_image);

        self.retry
            .run("create workload", || {
                self.bounded(async {
                    self.jobs
                        .create(&PostParams::default(), &workload)
                        .await
                        .map(|_| ())
                        .map_err(map_kube_err)
                })
            })
            .await
    }

    async fn state(&self, name: &str) -> Result<WorkloadState, ClusterError> {
        let workload = self
            .retry
            .run("read workload", || {
                self.bounded(async { self.jobs.get_opt(name).await.map_err(map_kube_err) })
            })
            .await?;

        match workload {
            Some(w) => Ok(classify(&w)),
            None => Err(ClusterError::NotFound),
        }
    }

    async fn logs(&self, name: &str, max_bytes: i64) -> Result<String, ClusterError> {
        // The batch controller labels every pod with the owning workload name
        let selector = format!("job-name={name}");

        let pods = self
            .retry
            .run("list workload pods", || {
                self.bounded(async {
                    self.pods
                        .list(&ListParams::default().labels(&selector))
                        .await
                        .map_err(map_kube_err)
                })
            })
            .await?;

        let newest = pods
            .items
            .into_iter()
            .max_by_key(|p| p.metadata.creation_timestamp.as_ref().map(|t| t.0));

        let Some(pod) = newest else {
            debug!(workload = %name, "No pods found for log excerpt");
            return Ok(String::new());
        };

        let pod_name = pod.metadata.name.unwrap_or_default();
        let params = LogParams {
            limit_bytes: Some(max_bytes),
            ..Default::default()
        };

        self.bounded(async {
            self.pods
                .logs(&pod_name, &params)
                .await
                .map_err(map_kube_err)
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        // Background propagation reclaims the pods without blocking the tick
        let params = DeleteParams::background();

        self.retry
            .run("delete workload", || {
                self.bounded(async {
                    match self.jobs.delete(name, &params).await {
                        Ok(_) => Ok(()),
                        Err(e) => match map_kube_err(e) {
                            ClusterError::NotFound => Ok(()),
                            other => Err(other),
                        },
                    }
                })
            })
            .await
    }

    async fn list_terminated(&self) -> Result<Vec<RetiredWorkload>, ClusterError> {
        let params = ListParams::default().labels(manifest::MANAGED_BY_SELECTOR);

        let workloads = self
            .retry
            .run("list workloads", || {
                self.bounded(async { self.jobs.list(&params).await.map_err(map_kube_err) })
            })
            .await?;

        let retired = workloads
            .items
            .into_iter()
            .filter(|w| {
                matches!(
                    classify(w),
                    WorkloadState::Succeeded | WorkloadState::Failed { .. }
                )
            })
            .map(|w| RetiredWorkload {
                finished_at: w.status.as_ref().and_then(finished_at),
                name: w.metadata.name.unwrap_or_default(),
            })
            .collect();

        Ok(retired)
    }
}

// =============================================================================
// Status interpretation
// =============================================================================

/// Derive the workload state from the batch object.
///
/// Failure is only reported once the cluster's own retry budget is exhausted
/// (the `Failed` condition); pods merely crash-looping below the backoff
/// limit still count as in-flight.
fn classify(workload: &BatchJob) -> WorkloadState {
    // A suspended workload is a state this controller never produces
    if workload.spec.as_ref().and_then(|s| s.suspend) == Some(true) {
        return WorkloadState::Unknown;
    }

    let Some(status) = workload.status.as_ref() else {
        return WorkloadState::Pending;
    };

    if status.succeeded.unwrap_or(0) > 0 {
        return WorkloadState::Succeeded;
    }

    if let Some(condition) = failed_condition(status) {
        return WorkloadState::Failed {
            message: condition,
            pod_failures: status.failed.unwrap_or(0),
        };
    }

    if status.active.unwrap_or(0) > 0 {
        return WorkloadState::Active;
    }

    WorkloadState::Pending
}

fn failed_condition(status: &BatchJobStatus) -> Option<String> {
    status.conditions.as_ref().and_then(|conditions| {
        conditions
            .iter()
            .find(|c| c.type_ == "Failed" && c.status == "True")
            .map(|c| {
                c.message
                    .clone()
                    .or_else(|| c.reason.clone())
                    .unwrap_or_else(|| "workload failed".to_string())
            })
    })
}

fn finished_at(status: &BatchJobStatus) -> Option<DateTime<Utc>> {
    if let Some(t) = &status.completion_time {
        return Some(t.0);
    }

    status.conditions.as_ref().and_then(|conditions| {
        conditions
            .iter()
            .find(|c| c.type_ == "Failed" && c.status == "True")
            .and_then(|c| c.last_transition_time.as_ref())
            .map(|t| t.0)
    })
}

fn map_kube_err(e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::NotFound,
        kube::Error::Api(ae) if ae.code == 409 => ClusterError::AlreadyExists,
        // 429 is backpressure, not a verdict on the manifest
        kube::Error::Api(ae) if ae.code == 429 => ClusterError::Api(ae.message),
        kube::Error::Api(ae) if (400..500).contains(&ae.code) => ClusterError::Rejected(ae.message),
        other => ClusterError::Api(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobCondition;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn workload_with_status(status: BatchJobStatus) -> BatchJob {
        BatchJob {
            status: Some(status),
            ..Default::default()
        }
    }

    fn condition(type_: &str, status: &str, message: Option<&str>) -> JobCondition {
        JobCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            message: message.map(|m| m.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_status_is_pending() {
        assert_eq!(classify(&BatchJob::default()), WorkloadState::Pending);
    }

    #[test]
    fn test_active_pods_mean_active() {
        let w = workload_with_status(BatchJobStatus {
            active: Some(1),
            ..Default::default()
        });
        assert_eq!(classify(&w), WorkloadState::Active);
    }

    #[test]
    fn test_succeeded_counter_wins() {
        let w = workload_with_status(BatchJobStatus {
            succeeded: Some(1),
            ..Default::default()
        });
        assert_eq!(classify(&w), WorkloadState::Succeeded);
    }

    #[test]
    fn test_failed_requires_exhausted_retry_budget() {
        // Pod failures without a Failed condition are still in-flight
        let retrying = workload_with_status(BatchJobStatus {
            failed: Some(1),
            active: Some(1),
            ..Default::default()
        });
        assert_eq!(classify(&retrying), WorkloadState::Active);

        let exhausted = workload_with_status(BatchJobStatus {
            failed: Some(3),
            conditions: Some(vec![condition(
                "Failed",
                "True",
                Some("BackoffLimitExceeded"),
            )]),
            ..Default::default()
        });
        assert_eq!(
            classify(&exhausted),
            WorkloadState::Failed {
                message: "BackoffLimitExceeded".to_string(),
                pod_failures: 3,
            }
        );
    }

    #[test]
    fn test_suspended_is_unrecognized() {
        let w = BatchJob {
            spec: Some(k8s_openapi::api::batch::v1::JobSpec {
                suspend: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(classify(&w), WorkloadState::Unknown);
    }

    #[test]
    fn test_finished_at_prefers_completion_time() {
        let at = Utc::now();
        let status = BatchJobStatus {
            completion_time: Some(Time(at)),
            ..Default::default()
        };
        assert_eq!(finished_at(&status), Some(at));
    }

    #[test]
    fn test_finished_at_falls_back_to_failed_condition() {
        let at = Utc::now();
        let status = BatchJobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                last_transition_time: Some(Time(at)),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert_eq!(finished_at(&status), Some(at));
    }
}
