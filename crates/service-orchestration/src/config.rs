//! Settings for the provisioning pipeline
//!
//! Settings come from an optional YAML/JSON file and are then overridden by
//! environment variables. Every field has a default so an empty file (or no
//! file at all) is a working local setup.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file looked up in the working directory when none is given
pub const DEFAULT_SETTINGS_FILE: &str = "launchpad.yaml";

/// Environment variable names understood by [`Settings::apply_env`]
pub mod env {
    /// SSH command used for git authentication
    pub const GIT_SSH_COMMAND: &str = "GIT_SSH_COMMAND";
    /// Delivery repository URL
    pub const DELIVERY_REPO: &str = "LAUNCHPAD_DELIVERY_REPO";
    /// Delivery workspace directory
    pub const DELIVERY_DIR: &str = "LAUNCHPAD_DELIVERY_DIR";
    /// Image registry address
    pub const REGISTRY: &str = "LAUNCHPAD_REGISTRY";
    /// Whether the registry is insecure
    pub const INSECURE_REGISTRY: &str = "LAUNCHPAD_INSECURE_REGISTRY";
    /// Local cluster to import images into
    pub const LOCAL_CLUSTER: &str = "LAUNCHPAD_LOCAL_CLUSTER";
    /// Image builder backend
    pub const BUILDER: &str = "LAUNCHPAD_BUILDER";
    /// State directory
    pub const DATA_DIR: &str = "LAUNCHPAD_DATA_DIR";
}

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// State directory: store, generated sources, workspaces
    pub data_dir: PathBuf,
    /// Tag applied to built images
    pub image_tag: String,
    /// Upper bound for any single external command, unbounded when unset
    pub command_timeout_secs: Option<u64>,
    /// Delivery repository and reconciliation settings
    pub delivery: DeliverySettings,
    /// Git identity and authentication
    pub git: GitSettings,
    /// Image registry
    pub registry: RegistrySettings,
    /// Image builder
    pub builder: BuilderSettings,
    /// Cluster client
    pub cluster: ClusterSettings,
}

/// Delivery repository and reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Remote delivery repository, local mode when unset
    pub repo_url: Option<String>,
    /// Persistent checkout of the delivery repository
    pub workspace_dir: Option<PathBuf>,
    /// Revision the application resource tracks
    pub revision: String,
    /// Namespace holding application resources
    pub app_namespace: String,
    /// Project application resources belong to
    pub project: String,
    /// Cluster API server the applications deploy to
    pub destination_server: String,
}

/// Git identity and authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    /// Value for `GIT_SSH_COMMAND`
    pub ssh_command: Option<String>,
    /// Commit author name
    pub author_name: String,
    /// Commit author email
    pub author_email: String,
    /// Branch pushed to
    pub branch: String,
}

/// Image registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Registry host, `None` or `local` for unprefixed images
    pub address: Option<String>,
    /// Allow plain-HTTP pushes
    pub insecure: bool,
}

/// Which image builder backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuilderKind {
    /// Build with the local container daemon
    #[default]
    LocalDaemon,
    /// Build in a batch job inside the cluster
    ClusterJob,
}

impl std::str::FromStr for BuilderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "local-daemon" | "local" | "docker" => Ok(BuilderKind::LocalDaemon),
            "cluster-job" | "job" | "kaniko" => Ok(BuilderKind::ClusterJob),
            other => Err(Error::Config(format!("unknown builder backend: {other}"))),
        }
    }
}

/// Image builder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderSettings {
    /// Backend selection
    pub backend: BuilderKind,
    /// Local cluster whose image cache receives built images
    pub local_cluster: Option<String>,
    /// Namespace build jobs run in
    pub namespace: String,
    /// Volume claim holding build contexts
    pub context_claim: String,
    /// Where the claim is mounted inside the build pod
    pub context_mount: String,
    /// Where the claim is visible on this host; defaults to the apps dir
    pub context_root: Option<PathBuf>,
    /// Builder image
    pub executor_image: String,
    /// Service account for build pods
    pub service_account: String,
    /// Seconds between job status polls
    pub poll_interval_secs: u64,
    /// Seconds before a build is reported as timed out
    pub timeout_secs: u64,
    /// Seconds a finished job is kept before the cluster removes it
    pub ttl_after_finished_secs: u64,
    /// Attempts (one per second) to find the build pod
    pub pod_discovery_attempts: u32,
    /// Attempts (one per second) to see the build pod running
    pub pod_running_attempts: u32,
    /// Age after which completed jobs are pruned
    pub retention_hours: u64,
}

/// Cluster client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// kubectl binary
    pub kubectl: String,
    /// Last-resort namespace when scaling
    pub fallback_namespace: String,
    /// Seconds to wait for pods to become ready
    pub rollout_timeout_secs: u64,
    /// Seconds between checks for the workload while waiting
    pub rollout_poll_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            image_tag: "v1.0".to_string(),
            command_timeout_secs: None,
            delivery: DeliverySettings::default(),
            git: GitSettings::default(),
            registry: RegistrySettings::default(),
            builder: BuilderSettings::default(),
            cluster: ClusterSettings::default(),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            repo_url: None,
            workspace_dir: None,
            revision: "HEAD".to_string(),
            app_namespace: "argocd".to_string(),
            project: "default".to_string(),
            destination_server: "https://kubernetes.default.svc".to_string(),
        }
    }
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            ssh_command: None,
            author_name: "Launchpad Bot".to_string(),
            author_email: "bot@launchpad.local".to_string(),
            branch: "main".to_string(),
        }
    }
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            backend: BuilderKind::LocalDaemon,
            local_cluster: None,
            namespace: "launchpad".to_string(),
            context_claim: "launchpad-build-context".to_string(),
            context_mount: "/workspace".to_string(),
            context_root: None,
            executor_image: "gcr.io/kaniko-project/executor:latest".to_string(),
            service_account: "image-builder".to_string(),
            poll_interval_secs: 2,
            timeout_secs: 600,
            ttl_after_finished_secs: 300,
            pod_discovery_attempts: 30,
            pod_running_attempts: 60,
            retention_hours: 24,
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            fallback_namespace: "default".to_string(),
            rollout_timeout_secs: 120,
            rollout_poll_secs: 2,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("launchpad")
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl Settings {
    /// Load settings from a YAML or JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = async_fs::read_to_string(path).await?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Ok(serde_json::from_str(&contents)?),
            _ => {
                // An empty YAML document means "all defaults"
                if contents.trim().is_empty() {
                    Ok(Self::default())
                } else {
                    Ok(serde_yaml::from_str(&contents)?)
                }
            }
        }
    }

    /// Load from `path` (or [`DEFAULT_SETTINGS_FILE`] when present), then
    /// apply the process environment
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path).await?,
            None if Path::new(DEFAULT_SETTINGS_FILE).exists() => {
                Self::from_file(DEFAULT_SETTINGS_FILE).await?
            }
            None => Self::default(),
        };
        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    /// Apply environment overrides from `vars`
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                env::GIT_SSH_COMMAND => self.git.ssh_command = non_empty(value),
                env::DELIVERY_REPO => self.delivery.repo_url = non_empty(value),
                env::DELIVERY_DIR => self.delivery.workspace_dir = non_empty(value).map(PathBuf::from),
                env::REGISTRY => self.registry.address = non_empty(value),
                env::INSECURE_REGISTRY => self.registry.insecure = parse_flag(&value),
                env::LOCAL_CLUSTER => self.builder.local_cluster = non_empty(value),
                env::BUILDER => self.builder.backend = value.parse()?,
                env::DATA_DIR => {
                    if let Some(dir) = non_empty(value) {
                        self.data_dir = PathBuf::from(dir);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Persistent checkout of the delivery repository
    pub fn workspace_dir(&self) -> PathBuf {
        self.delivery
            .workspace_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("delivery"))
    }

    /// Directory tree used when no delivery repository is reachable
    pub fn local_delivery_dir(&self) -> PathBuf {
        self.data_dir.join("delivery-local")
    }

    /// Root under which application sources are generated
    pub fn apps_dir(&self) -> PathBuf {
        self.data_dir.join("apps")
    }

    /// Path of the service store database
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    /// Host path of the shared build-context volume
    pub fn build_context_root(&self) -> PathBuf {
        self.builder
            .context_root
            .clone()
            .unwrap_or_else(|| self.apps_dir())
    }

    /// Registry prefix, `None` for the local image cache
    pub fn registry(&self) -> Option<&str> {
        self.registry
            .address
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty() && *r != "local")
    }

    /// Image reference for a workload
    pub fn image_for(&self, name: &str) -> String {
        match self.registry() {
            Some(registry) => format!("{}/{}:{}", registry.trim_end_matches('/'), name, self.image_tag),
            None => format!("{}:{}", name, self.image_tag),
        }
    }

    /// Per-command timeout
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

impl BuilderSettings {
    /// Interval between job status polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Build timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
