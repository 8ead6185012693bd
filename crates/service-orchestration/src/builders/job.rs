//! Builds inside the cluster with a batch job
//!
//! The build context is shared with the job through a volume claim: files
//! generated under the context root on this host are visible below the
//! mount path inside the build pod. The job builds without a container
//! daemon and pushes straight to the registry.

use super::{BuildRequest, ImageBuilder};
use crate::cluster::Kubectl;
use crate::config::BuilderSettings;
use crate::executors::{CommandRunner, ProcessExecutor};
use crate::sink::PipelineLog;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{self, Either};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label selecting every job this builder creates
pub const JOB_SELECTOR: &str = "app=image-builder";

const MAX_JOB_NAME_LEN: usize = 63;
const LOG_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Observed state of a build job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Still running or not yet scheduled
    Running,
    /// Completed successfully
    Succeeded,
    /// Failed; jobs are never retried
    Failed,
}

impl JobState {
    /// State from a job object's `status`
    pub fn from_job(job: &Value) -> Self {
        let count = |field: &str| job["status"][field].as_u64().unwrap_or(0);
        if count("succeeded") > 0 {
            JobState::Succeeded
        } else if count("failed") > 0 {
            JobState::Failed
        } else {
            JobState::Running
        }
    }
}

/// Builds images with a non-retrying batch job in the cluster
pub struct ClusterJobBuilder {
    kubectl: Kubectl,
    process: Arc<ProcessExecutor>,
    settings: BuilderSettings,
    registry: Option<String>,
    insecure: bool,
    context_root: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
    pod_wait_step: Duration,
}

impl ClusterJobBuilder {
    /// Create a builder pushing to `registry`
    pub fn new(
        kubectl: Kubectl,
        process: Arc<ProcessExecutor>,
        settings: BuilderSettings,
        registry: Option<String>,
        insecure: bool,
        context_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kubectl,
            process,
            poll_interval: settings.poll_interval(),
            timeout: settings.timeout(),
            pod_wait_step: Duration::from_secs(1),
            settings,
            registry,
            insecure,
            context_root: context_root.into(),
        }
    }

    /// Override polling cadence and overall timeout
    pub fn with_timing(mut self, poll_interval: Duration, timeout: Duration, pod_wait_step: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self.pod_wait_step = pod_wait_step;
        self
    }

    fn runner(&self) -> Arc<dyn CommandRunner> {
        self.process.runner().clone()
    }

    /// Unique job name for a build of `service`
    pub fn job_name(service: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let budget = MAX_JOB_NAME_LEN - "kaniko-".len() - 9;
        let service: String = service.chars().take(budget).collect();
        format!("kaniko-{}-{}", service.trim_end_matches('-'), &suffix[..8])
    }

    /// Path of `context_dir` relative to the shared context root
    pub fn context_path(&self, context_dir: &Path) -> Result<String> {
        let relative = context_dir.strip_prefix(&self.context_root).map_err(|_| {
            Error::Config(format!(
                "build context {:?} is outside the shared context root {:?}",
                context_dir, self.context_root
            ))
        })?;
        Ok(relative.to_string_lossy().trim_matches('/').to_string())
    }

    /// Job object for one build
    pub fn job_manifest(&self, job_name: &str, context_path: &str, dockerfile: &str, destination: &str) -> Value {
        let mount = self.settings.context_mount.trim_end_matches('/');
        let context = if context_path.is_empty() {
            mount.to_string()
        } else {
            format!("{mount}/{context_path}")
        };

        let mut args = vec![
            format!("--context=dir://{context}"),
            format!("--dockerfile={context}/{dockerfile}"),
            format!("--destination={destination}"),
            "--cache=true".to_string(),
            "--cache-ttl=24h".to_string(),
        ];
        if self.insecure {
            args.push("--insecure".to_string());
            if let Some(registry) = &self.registry {
                args.push(format!("--insecure-registry={registry}"));
            }
        }

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": job_name,
                "namespace": self.settings.namespace,
                "labels": { "app": "image-builder", "managed-by": "launchpad" }
            },
            "spec": {
                "backoffLimit": 0,
                "ttlSecondsAfterFinished": self.settings.ttl_after_finished_secs,
                "template": {
                    "metadata": {
                        "labels": { "app": "image-builder", "build": job_name }
                    },
                    "spec": {
                        "restartPolicy": "Never",
                        "serviceAccountName": self.settings.service_account,
                        "containers": [{
                            "name": "builder",
                            "image": self.settings.executor_image,
                            "args": args,
                            "volumeMounts": [{
                                "name": "build-context",
                                "mountPath": self.settings.context_mount
                            }],
                            "resources": {
                                "requests": { "memory": "512Mi", "cpu": "250m" },
                                "limits": { "memory": "2Gi", "cpu": "1" }
                            }
                        }],
                        "volumes": [{
                            "name": "build-context",
                            "persistentVolumeClaim": { "claimName": self.settings.context_claim }
                        }]
                    }
                }
            }
        })
    }

    async fn submit(&self, job: &Value) -> Result<()> {
        let file = tempfile::Builder::new()
            .prefix("launchpad-job-")
            .suffix(".json")
            .tempfile()?;
        async_fs::write(file.path(), serde_json::to_vec_pretty(job)?).await?;
        self.kubectl.create_from_file(file.path()).await
    }

    /// Current state of `job_name`
    pub async fn job_state(&self, job_name: &str) -> Result<JobState> {
        let job = self
            .kubectl
            .get_json("job", job_name, &self.settings.namespace)
            .await?;
        Ok(JobState::from_job(&job))
    }

    /// Poll `job_name` until it finishes or the timeout runs out
    ///
    /// Errors while polling are logged and polling continues.
    pub async fn wait_for_job(&self, job_name: &str) -> Result<JobState> {
        let poll = async {
            loop {
                match self.job_state(job_name).await {
                    Ok(JobState::Running) => {}
                    Ok(done) => return done,
                    Err(e) => warn!("Error checking status of job {}: {}", job_name, e),
                }
                smol::Timer::after(self.poll_interval).await;
            }
        };

        let timed = async {
            smol::Timer::after(self.timeout).await;
            None
        };

        match smol::future::or(async { Some(poll.await) }, timed).await {
            Some(state) => Ok(state),
            None => {
                warn!("Build job {} timed out after {}s", job_name, self.timeout.as_secs());
                if let Err(e) = self
                    .kubectl
                    .delete_in_background("job", job_name, &self.settings.namespace)
                    .await
                {
                    warn!("Failed to remove timed out job {}: {}", job_name, e);
                }
                Err(Error::Timeout {
                    operation: format!("build job {job_name}"),
                    after: self.timeout,
                })
            }
        }
    }

    /// Log lines of the pod running `job_name`
    ///
    /// Nothing happens until the stream is polled. Each call starts from
    /// the beginning of the pod log; a single stream cannot be restarted.
    pub fn build_logs(&self, job_name: &str) -> BoxStream<'static, String> {
        let kubectl = self.kubectl.clone();
        let runner = self.runner();
        let namespace = self.settings.namespace.clone();
        let job_name = job_name.to_string();
        let discovery_attempts = self.settings.pod_discovery_attempts;
        let running_attempts = self.settings.pod_running_attempts;
        let step = self.pod_wait_step;

        stream::once(async move {
            let selector = format!("job-name={job_name}");
            let mut pod = None;
            for attempt in 0..discovery_attempts {
                if attempt > 0 {
                    smol::Timer::after(step).await;
                }
                if let Ok(pods) = kubectl.list_json("pods", &namespace, &selector).await {
                    pod = pods
                        .first()
                        .and_then(|p| p["metadata"]["name"].as_str())
                        .map(str::to_string);
                }
                if pod.is_some() {
                    break;
                }
            }

            let Some(pod) = pod else {
                return stream::iter(vec![format!("❌ Could not find build pod for job {job_name}")])
                    .boxed();
            };
            debug!("Build job {} runs in pod {}", job_name, pod);

            for attempt in 0..running_attempts {
                if attempt > 0 {
                    smol::Timer::after(step).await;
                }
                let phase = kubectl
                    .get_json("pod", &pod, &namespace)
                    .await
                    .ok()
                    .and_then(|p| p["status"]["phase"].as_str().map(str::to_string));
                if matches!(phase.as_deref(), Some("Running" | "Succeeded" | "Failed")) {
                    break;
                }
            }

            match runner.spawn(kubectl.logs_command(&pod, &namespace)).await {
                Ok((events, handle)) => {
                    let lines = events.filter_map(|event| async move { event.source().and(event.data) });
                    // The handle lives as long as the stream so the follower is not killed early
                    stream::unfold((lines.boxed(), handle), |(mut lines, handle)| async move {
                        let line = lines.next().await?;
                        Some((line, (lines, handle)))
                    })
                    .boxed()
                }
                Err(e) => stream::iter(vec![format!("❌ Failed to stream build logs: {e}")]).boxed(),
            }
        })
        .flatten()
        .boxed()
    }

    /// Delete completed builder jobs that finished more than `max_age` ago
    ///
    /// Returns how many jobs were deleted. Failures to delete one job are
    /// logged and do not stop the sweep.
    pub async fn cleanup_old_jobs(&self, max_age: Duration) -> Result<usize> {
        let jobs = self
            .kubectl
            .list_json("jobs", &self.settings.namespace, JOB_SELECTOR)
            .await?;
        let now = Utc::now();
        let mut deleted = 0;

        for job in &jobs {
            let Some(name) = job["metadata"]["name"].as_str() else {
                continue;
            };
            let Some(completed) = job["status"]["completionTime"]
                .as_str()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            else {
                continue;
            };

            let age = now.signed_duration_since(completed.with_timezone(&Utc));
            if age.to_std().is_ok_and(|age| age > max_age) {
                match self
                    .kubectl
                    .delete_in_background("job", name, &self.settings.namespace)
                    .await
                {
                    Ok(()) => {
                        info!("Cleaned up old build job: {}", name);
                        deleted += 1;
                    }
                    Err(e) => warn!("Failed to delete build job {}: {}", name, e),
                }
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl ImageBuilder for ClusterJobBuilder {
    fn name(&self) -> &'static str {
        "cluster-job"
    }

    async fn build(&self, request: &BuildRequest, log: &PipelineLog<'_>) -> Result<String> {
        if self.registry.is_none() {
            return Err(Error::Config(
                "the cluster-job builder needs a registry to push to".to_string(),
            ));
        }

        let context_path = self.context_path(&request.context_dir)?;
        let job_name = Self::job_name(&request.service);
        let job = self.job_manifest(&job_name, &context_path, &request.dockerfile, &request.tag);

        log.info(format!("Starting build job {job_name} for {}", request.tag)).await;
        self.submit(&job).await?;
        info!("Build job created: {}", job_name);

        let logs = self.process.forward_lines(log, self.build_logs(&job_name));
        let wait = self.wait_for_job(&job_name);
        futures::pin_mut!(logs, wait);

        let outcome = match future::select(wait, logs).await {
            // A timed-out or unobservable job has nothing left worth draining
            Either::Left((outcome, logs)) => {
                if outcome.is_ok() {
                    smol::future::or(logs, async {
                        smol::Timer::after(LOG_DRAIN_GRACE).await;
                    })
                    .await;
                }
                outcome
            }
            Either::Right(((), wait)) => wait.await,
        };

        match outcome? {
            JobState::Succeeded => {
                log.success(format!("Image built and pushed: {}", request.tag)).await;
                Ok(request.tag.clone())
            }
            _ => Err(Error::ExternalTool {
                command: format!("build job {job_name}"),
                status: "failed".to_string(),
                detail: format!("check the logs of job {job_name}"),
            }),
        }
    }

    async fn publish(&self, image: &str, log: &PipelineLog<'_>) -> Result<()> {
        log.info(format!("{image} was pushed to the registry by the build job"))
            .await;
        Ok(())
    }
}
