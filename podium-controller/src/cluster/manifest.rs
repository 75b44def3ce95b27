//! Workload manifest construction
//!
//! Builds the namespaced batch workload for an admitted job: a single agent
//! container pointed at the competition URL, with the shared artifact volume
//! mounted and credentials injected from a secret.
//!
//! The manifest deliberately carries no `activeDeadlineSeconds`: deadline
//! enforcement belongs to the reconciliation loop, which force-terminates
//! expired workloads itself so that timeouts are always classified as
//! timeouts and never as generic cluster failures.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job as BatchJob, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, PersistentVolumeClaimVolumeSource,
    PodSpec, PodTemplateSpec, ResourceRequirements, SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use podium_core::domain::job::Job;

use super::WorkloadSpec;

/// Label identifying workloads this controller owns
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "podium-controller";
/// Label selector matching every managed workload
pub const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=podium-controller";

/// Label carrying the ledger job id on workloads and pods
pub const JOB_ID_LABEL: &str = "podium.dev/job-id";

/// Secret holding platform credentials and the model API key
const CREDENTIALS_SECRET: &str = "agent-secrets";

/// PVC the workloads write result artifacts to
const ARTIFACT_CLAIM: &str = "submissions-storage";

/// Build the batch workload manifest for an admitted job.
///
/// The workload:
/// - Runs a single `agent` container with `--job-id` and `--url` args
/// - Mounts an emptyDir scratch volume at `/output` and the shared artifact
///   PVC at `/shared`
/// - Uses `restartPolicy: Never` with the policy-computed backoff limit
/// - Carries the managed-by and job-id labels on both workload and pods
pub fn build_workload(
    job: &Job,
    name: &str,
    spec: &WorkloadSpec,
    namespace: &str,
    image: &str,
) -> BatchJob {
    let labels = workload_labels(job);

    let container = Container {
        name: "agent".to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            "--job-id".to_string(),
            job.id.to_string(),
            "--url".to_string(),
            job.source_url.clone(),
        ]),
        env: Some(vec![
            EnvVar {
                name: "JOB_ID".to_string(),
                value: Some(job.id.to_string()),
                ..Default::default()
            },
            secret_env("PLATFORM_USERNAME"),
            secret_env("PLATFORM_KEY"),
            secret_env("MODEL_API_KEY"),
        ]),
        resources: Some(resource_requirements(spec)),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "output".to_string(),
                mount_path: "/output".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "shared-storage".to_string(),
                mount_path: "/shared".to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let pod_template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![container],
            volumes: Some(vec![
                Volume {
                    name: "output".to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                },
                Volume {
                    name: "shared-storage".to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: ARTIFACT_CLAIM.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            node_selector: Some(BTreeMap::from([(
                "workload".to_string(),
                "agent-jobs".to_string(),
            )])),
            ..Default::default()
        }),
    };

    BatchJob {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: pod_template,
            backoff_limit: Some(spec.retry_budget),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn workload_labels(job: &Job) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (JOB_ID_LABEL.to_string(), job.id.to_string()),
    ])
}

fn secret_env(key: &str) -> EnvVar {
    EnvVar {
        name: key.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: CREDENTIALS_SECRET.to_string(),
                key: key.to_string(),
                optional: Some(true),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn resource_requirements(spec: &WorkloadSpec) -> ResourceRequirements {
    let mut requests = BTreeMap::from([
        ("cpu".to_string(), Quantity(format!("{}m", spec.cpu_millis))),
        (
            "memory".to_string(),
            Quantity(format!("{}Mi", spec.memory_mb)),
        ),
    ]);
    let mut limits = BTreeMap::from([
        (
            "cpu".to_string(),
            Quantity(format!("{}m", spec.cpu_limit_millis)),
        ),
        (
            "memory".to_string(),
            Quantity(format!("{}Mi", spec.memory_limit_mb)),
        ),
    ]);

    // Accelerators must be requested and limited with the same value
    if spec.gpus > 0 {
        let gpu = Quantity(spec.gpus.to_string());
        requests.insert("nvidia.com/gpu".to_string(), gpu.clone());
        limits.insert("nvidia.com/gpu".to_string(), gpu);
    }

    ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use podium_core::domain::job::{JobStatus, ResourceProfile, workload_name};
    use std::time::Duration;
    use uuid::Uuid;

    fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            source_url: "https://example.com/competitions/spaceship-titanic".to_string(),
            competition: Some("spaceship-titanic".to_string()),
            status: JobStatus::Pending,
            workload_name: None,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            completed_at: None,
            resources: ResourceProfile::default(),
            timeout_secs: None,
            artifact_path: None,
            error_message: None,
            log_excerpt: None,
            retry_count: 0,
            unobserved_ticks: 0,
            cancel_requested: false,
        }
    }

    fn sample_spec() -> WorkloadSpec {
        WorkloadSpec {
            cpu_millis: 1000,
            cpu_limit_millis: 2000,
            memory_mb: 2048,
            memory_limit_mb: 4096,
            gpus: 0,
            deadline: Duration::from_secs(7200),
            retry_budget: 2,
        }
    }

    fn build(job: &Job, spec: &WorkloadSpec) -> BatchJob {
        let name = workload_name(job.id);
        build_workload(job, &name, spec, "podium", "podium/agent:latest")
    }

    #[test]
    fn test_name_and_namespace() {
        let job = sample_job();
        let manifest = build(&job, &sample_spec());
        assert_eq!(
            manifest.metadata.name.as_deref(),
            Some(workload_name(job.id).as_str())
        );
        assert_eq!(manifest.metadata.namespace.as_deref(), Some("podium"));
    }

    #[test]
    fn test_labels_on_workload_and_pods() {
        let job = sample_job();
        let manifest = build(&job, &sample_spec());

        let labels = manifest.metadata.labels.as_ref().unwrap();
        assert_eq!(
            labels.get(MANAGED_BY_LABEL),
            Some(&MANAGED_BY_VALUE.to_string())
        );
        assert_eq!(labels.get(JOB_ID_LABEL), Some(&job.id.to_string()));

        let pod_labels = manifest
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .as_ref()
            .unwrap();
        assert_eq!(pod_labels.get(JOB_ID_LABEL), Some(&job.id.to_string()));
    }

    #[test]
    fn test_container_args_carry_descriptor() {
        let job = sample_job();
        let manifest = build(&job, &sample_spec());
        let container = &manifest.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];

        let args = container.args.as_ref().unwrap();
        assert!(args.contains(&"--job-id".to_string()));
        assert!(args.contains(&job.id.to_string()));
        assert!(args.contains(&"--url".to_string()));
        assert!(args.contains(&job.source_url));
    }

    #[test]
    fn test_resource_requests_and_limits() {
        let job = sample_job();
        let manifest = build(&job, &sample_spec());
        let resources = manifest.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .resources
            .as_ref()
            .unwrap();

        let requests = resources.requests.as_ref().unwrap();
        assert_eq!(requests.get("cpu"), Some(&Quantity("1000m".to_string())));
        assert_eq!(requests.get("memory"), Some(&Quantity("2048Mi".to_string())));

        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("2000m".to_string())));
        assert_eq!(limits.get("memory"), Some(&Quantity("4096Mi".to_string())));
        assert!(limits.get("nvidia.com/gpu").is_none());
    }

    #[test]
    fn test_gpu_request_matches_limit() {
        let job = sample_job();
        let mut spec = sample_spec();
        spec.gpus = 1;
        let manifest = build(&job, &spec);
        let resources = manifest.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .resources
            .as_ref()
            .unwrap();

        let gpu = Quantity("1".to_string());
        assert_eq!(
            resources.requests.as_ref().unwrap().get("nvidia.com/gpu"),
            Some(&gpu)
        );
        assert_eq!(
            resources.limits.as_ref().unwrap().get("nvidia.com/gpu"),
            Some(&gpu)
        );
    }

    #[test]
    fn test_mounts_scratch_and_shared_volumes() {
        let job = sample_job();
        let manifest = build(&job, &sample_spec());
        let pod_spec = manifest.spec.as_ref().unwrap().template.spec.as_ref().unwrap();

        let volumes = pod_spec.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 2);
        assert!(volumes[0].empty_dir.is_some());
        assert_eq!(
            volumes[1]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            ARTIFACT_CLAIM
        );

        let mounts = pod_spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/output");
        assert_eq!(mounts[1].mount_path, "/shared");
    }

    #[test]
    fn test_no_restart_and_bounded_backoff() {
        let job = sample_job();
        let manifest = build(&job, &sample_spec());
        let workload_spec = manifest.spec.as_ref().unwrap();

        assert_eq!(
            workload_spec.template.spec.as_ref().unwrap().restart_policy.as_deref(),
            Some("Never")
        );
        assert_eq!(workload_spec.backoff_limit, Some(2));
    }

    #[test]
    fn test_deadline_is_not_delegated_to_the_cluster() {
        let job = sample_job();
        let manifest = build(&job, &sample_spec());
        assert!(manifest.spec.as_ref().unwrap().active_deadline_seconds.is_none());
    }

    #[test]
    fn test_credentials_are_optional_secret_refs() {
        let job = sample_job();
        let manifest = build(&job, &sample_spec());
        let env = manifest.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .env
            .as_ref()
            .unwrap();

        let key = env
            .iter()
            .find(|e| e.name == "MODEL_API_KEY")
            .and_then(|e| e.value_from.as_ref())
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(key.name, CREDENTIALS_SECRET);
        assert_eq!(key.optional, Some(true));
    }
}
