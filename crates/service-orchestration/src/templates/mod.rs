//! Template variants
//!
//! Each variant turns a [`ServiceConfig`] into application source and
//! deployment manifests. Variants are a closed set resolved by id; there
//! is no runtime registration.

pub mod collector;
pub mod delivery;
pub mod manifests;
pub mod network;
pub mod python;

pub use collector::CollectorTemplate;
pub use delivery::{Application, DeliveryTarget};
pub use network::NetworkServiceTemplate;
pub use python::PythonServiceTemplate;

use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use service_store::MAX_NAMESPACE_LEN;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The known template variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// Go HTTP service
    NetworkService,
    /// Python HTTP service
    PythonService,
    /// Legacy market data collector
    Collector,
}

impl TemplateKind {
    /// Every variant, in listing order
    pub const ALL: [TemplateKind; 3] = [
        TemplateKind::NetworkService,
        TemplateKind::PythonService,
        TemplateKind::Collector,
    ];

    /// Look a variant up by id
    pub fn resolve(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Stable id used in requests and records
    pub fn id(self) -> &'static str {
        match self {
            TemplateKind::NetworkService => "go-service",
            TemplateKind::PythonService => "python-service",
            TemplateKind::Collector => "collector",
        }
    }

    /// One-line description
    pub fn description(self) -> &'static str {
        match self {
            TemplateKind::NetworkService => "Go HTTP service with health and readiness endpoints",
            TemplateKind::PythonService => "Python HTTP service with health and readiness endpoints",
            TemplateKind::Collector => "Legacy coin data collector (name, coin, type)",
        }
    }

    /// Legacy variants get timestamped namespaces and wait for rollout
    pub fn is_legacy(self) -> bool {
        matches!(self, TemplateKind::Collector)
    }

    /// The handler implementing this variant
    pub fn handler(self) -> &'static dyn TemplateHandler {
        match self {
            TemplateKind::NetworkService => &NetworkServiceTemplate,
            TemplateKind::PythonService => &PythonServiceTemplate,
            TemplateKind::Collector => &CollectorTemplate,
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Handler input: fixed once the pipeline starts
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Workload name
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Image reference to build and deploy
    pub image: String,
    /// Template-specific parameters
    pub params: Map<String, Value>,
}

impl ServiceConfig {
    /// Create a config
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        image: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            image: image.into(),
            params,
        }
    }

    /// Raw parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key).filter(|v| !v.is_null())
    }

    /// Parameter rendered as text, numbers included
    pub fn str_param(&self, key: &str, default: &str) -> String {
        match self.param(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    /// Integer parameter; `None` when present but not a non-negative integer
    pub fn u64_param(&self, key: &str, default: u64) -> Option<u64> {
        match self.param(key) {
            None => Some(default),
            Some(value) => value.as_u64(),
        }
    }

    /// Boolean parameter
    pub fn bool_param(&self, key: &str, default: bool) -> bool {
        self.param(key).and_then(Value::as_bool).unwrap_or(default)
    }
}

/// Outcome of validating a config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    /// Every problem found; empty means valid
    pub errors: Vec<String>,
}

impl Validation {
    /// Whether no problem was found
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a problem
    pub fn push(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Convert into [`Error::Validation`] when there are problems
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::Validation(self.errors))
        }
    }

    /// Workload name rules shared by every variant
    pub fn check_name(&mut self, name: &str) {
        if name.is_empty() {
            self.push("service_name is required");
            return;
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            self.push(
                "service_name must contain only alphanumeric characters, hyphens, and underscores",
            );
        } else if name.starts_with('-') || name.ends_with('-') {
            self.push("service_name must start and end with an alphanumeric character");
        }
        if name.len() > MAX_NAMESPACE_LEN {
            self.push(format!(
                "service_name must be at most {MAX_NAMESPACE_LEN} characters"
            ));
        }
    }

    /// Namespace must be a DNS label
    pub fn check_namespace(&mut self, namespace: &str) {
        if namespace.is_empty() {
            self.push("namespace is empty; use a service name with letters or digits");
        } else if namespace.len() > MAX_NAMESPACE_LEN
            || !namespace
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || namespace.starts_with('-')
            || namespace.ends_with('-')
        {
            self.push(format!("namespace '{namespace}' is not a valid DNS label"));
        }
    }

    /// Port parameter rules
    pub fn check_port(&mut self, config: &ServiceConfig, default: u64) {
        match config.u64_param("port", default) {
            Some(port) if (1..=65535).contains(&port) => {}
            _ => self.push("port must be between 1 and 65535"),
        }
    }
}

/// One template variant
///
/// `validate` is pure and runs before anything touches the filesystem,
/// a process or the network.
#[async_trait]
pub trait TemplateHandler: Send + Sync {
    /// The variant this handler implements
    fn kind(&self) -> TemplateKind;

    /// Check the config without side effects
    fn validate(&self, config: &ServiceConfig) -> Validation;

    /// Application source files, relative path to content
    fn render_code(&self, config: &ServiceConfig) -> Result<BTreeMap<String, String>>;

    /// Deployment manifests, file name to content
    fn render_manifests(&self, config: &ServiceConfig) -> Result<BTreeMap<String, String>>;

    /// Whether deploy waits for the rollout to become ready
    fn awaits_rollout(&self) -> bool {
        self.kind().is_legacy()
    }

    /// Materialize the application source into a fresh `root/<name>` tree
    async fn generate_code(&self, config: &ServiceConfig, root: &Path) -> Result<PathBuf> {
        let files = self.render_code(config)?;
        let dir = root.join(&config.name);

        if async_fs::metadata(&dir).await.is_ok() {
            debug!("Replacing existing sources in {:?}", dir);
            async_fs::remove_dir_all(&dir).await?;
        }
        async_fs::create_dir_all(&dir).await?;

        for (relative, content) in &files {
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                async_fs::create_dir_all(parent).await?;
            }
            async_fs::write(&path, content).await?;
        }
        Ok(dir)
    }

    /// Deployment manifests plus the delivery application resource, keyed
    /// by path inside the delivery repository
    fn generate_manifests(
        &self,
        config: &ServiceConfig,
        target: &DeliveryTarget,
    ) -> Result<BTreeMap<String, String>> {
        let mut files: BTreeMap<String, String> = self
            .render_manifests(config)?
            .into_iter()
            .map(|(file, content)| (format!("{}/{}", delivery::manifests_path(&config.name), file), content))
            .collect();

        let application = Application::for_service(&config.name, &config.namespace, target);
        files.insert(
            delivery::application_path(&config.name),
            serde_yaml::to_string(&application)?,
        );
        Ok(files)
    }
}
