//! Builds with the local container daemon

use super::{BuildRequest, ImageBuilder};
use crate::executors::ProcessExecutor;
use crate::sink::PipelineLog;
use crate::{Error, Result};
use async_trait::async_trait;
use command_executor::Command;
use std::sync::Arc;
use tracing::info;

/// `docker build`, then `k3d image import` into a local cluster
pub struct LocalDaemonBuilder {
    process: Arc<ProcessExecutor>,
    docker: String,
    local_cluster: Option<String>,
}

impl LocalDaemonBuilder {
    /// Builder importing into `local_cluster` when set
    pub fn new(process: Arc<ProcessExecutor>, local_cluster: Option<String>) -> Self {
        Self {
            process,
            docker: "docker".to_string(),
            local_cluster,
        }
    }

    /// Use a different daemon client binary
    pub fn with_program(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    fn build_command(&self, request: &BuildRequest) -> Command {
        Command::builder(&self.docker)
            .arg("build")
            .args(["-t", request.tag.as_str()])
            .arg("-f")
            .arg(request.context_dir.join(&request.dockerfile))
            .arg(&request.context_dir)
            .build()
    }
}

#[async_trait]
impl ImageBuilder for LocalDaemonBuilder {
    fn name(&self) -> &'static str {
        "local-daemon"
    }

    async fn build(&self, request: &BuildRequest, log: &PipelineLog<'_>) -> Result<String> {
        let command = self.build_command(request);
        let rendered = command.to_string();
        log.info(format!("Building image: {}", request.tag)).await;

        let status = self.process.stream(log, command).await?;
        if !status.success() {
            return Err(Error::ExternalTool {
                command: rendered,
                status: status.to_string(),
                detail: format!("image build for {} failed", request.service),
            });
        }

        info!("Built image {}", request.tag);
        log.success("Image built").await;
        Ok(request.tag.clone())
    }

    async fn publish(&self, image: &str, log: &PipelineLog<'_>) -> Result<()> {
        let Some(cluster) = &self.local_cluster else {
            log.info("No local cluster configured, skipping import").await;
            return Ok(());
        };

        log.info(format!("Importing to local cluster: {cluster}")).await;
        let command = Command::builder("k3d")
            .args(["image", "import", image, "-c", cluster.as_str()])
            .build();
        self.process.stream_checked(log, command).await?;
        log.success("Image imported").await;
        Ok(())
    }
}
