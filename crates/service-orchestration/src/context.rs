//! Orchestration context
//!
//! Everything the pipeline and the lifecycle controller talk to is built
//! once from [`Settings`] and handed around explicitly in this object.

use crate::builders::{ClusterJobBuilder, ImageBuilder, LocalDaemonBuilder};
use crate::cluster::Kubectl;
use crate::config::{BuilderKind, Settings};
use crate::executors::{CommandRunner, LocalRunner, ProcessExecutor};
use crate::git::GitSyncManager;
use std::sync::Arc;

/// Shared dependencies of one process
#[derive(Clone)]
pub struct OrchestrationContext {
    /// Effective settings
    pub settings: Arc<Settings>,

    /// Runner every external tool goes through
    pub runner: Arc<dyn CommandRunner>,

    /// Streams tool output into service logs
    pub process: Arc<ProcessExecutor>,

    /// Delivery repository workspace
    pub git: Arc<GitSyncManager>,

    /// Cluster client
    pub kubectl: Kubectl,

    /// Active image builder
    pub builder: Arc<dyn ImageBuilder>,
}

impl OrchestrationContext {
    /// Context running real processes
    pub fn new(settings: Settings) -> Self {
        Self::with_runner(settings, Arc::new(LocalRunner::default()))
    }

    /// Context running every tool through `runner`
    pub fn with_runner(settings: Settings, runner: Arc<dyn CommandRunner>) -> Self {
        let process = Arc::new(
            ProcessExecutor::new(runner.clone()).with_timeout(settings.command_timeout()),
        );
        let git = Arc::new(GitSyncManager::new(
            runner.clone(),
            settings.git.clone(),
            settings.workspace_dir(),
            settings.local_delivery_dir(),
        ));
        let kubectl = Kubectl::new(
            runner.clone(),
            settings.cluster.kubectl.clone(),
            settings.delivery.app_namespace.clone(),
        );

        let builder: Arc<dyn ImageBuilder> = match settings.builder.backend {
            BuilderKind::LocalDaemon => Arc::new(LocalDaemonBuilder::new(
                process.clone(),
                settings.builder.local_cluster.clone(),
            )),
            BuilderKind::ClusterJob => Arc::new(job_builder(&settings, &kubectl, &process)),
        };

        Self {
            settings: Arc::new(settings),
            runner,
            process,
            git,
            kubectl,
            builder,
        }
    }

    /// Replace the image builder
    pub fn with_builder(mut self, builder: Arc<dyn ImageBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// In-cluster job builder, whichever backend is active
    ///
    /// Used for build-job maintenance.
    pub fn job_builder(&self) -> ClusterJobBuilder {
        job_builder(&self.settings, &self.kubectl, &self.process)
    }
}

fn job_builder(settings: &Settings, kubectl: &Kubectl, process: &Arc<ProcessExecutor>) -> ClusterJobBuilder {
    ClusterJobBuilder::new(
        kubectl.clone(),
        process.clone(),
        settings.builder.clone(),
        settings.registry().map(str::to_string),
        settings.registry.insecure,
        settings.build_context_root(),
    )
}
