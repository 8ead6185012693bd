//! Container image builders
//!
//! The pipeline only sees [`ImageBuilder`]; which backend is active comes
//! from [`BuilderKind`](crate::config::BuilderKind).

pub mod job;
pub mod local;

pub use job::ClusterJobBuilder;
pub use local::LocalDaemonBuilder;

use crate::Result;
use crate::sink::PipelineLog;
use async_trait::async_trait;
use std::path::PathBuf;

/// What to build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Workload name the image belongs to
    pub service: String,
    /// Build context directory on this host
    pub context_dir: PathBuf,
    /// Dockerfile name inside the context
    pub dockerfile: String,
    /// Full image reference to produce
    pub tag: String,
}

impl BuildRequest {
    /// Request building `tag` from `context_dir/Dockerfile`
    pub fn new(service: impl Into<String>, context_dir: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            context_dir: context_dir.into(),
            dockerfile: "Dockerfile".to_string(),
            tag: tag.into(),
        }
    }
}

/// Produces and publishes container images
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Backend name for log lines
    fn name(&self) -> &'static str;

    /// Build the image, streaming progress into `log`; returns the image reference
    async fn build(&self, request: &BuildRequest, log: &PipelineLog<'_>) -> Result<String>;

    /// Make a built image available to the cluster
    async fn publish(&self, image: &str, log: &PipelineLog<'_>) -> Result<()>;
}
