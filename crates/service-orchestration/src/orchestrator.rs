//! Service creation pipeline
//!
//! A request is first turned into a [`PreparedService`] without side
//! effects: the variant is resolved, names are derived and the config is
//! validated. The pipeline then runs its stages strictly in order and
//! stops at the first required stage that fails. Publishing the image and
//! pushing to the delivery repository are best-effort; a failed push
//! switches deployment to applying the manifests directly.

use crate::builders::BuildRequest;
use crate::context::OrchestrationContext;
use crate::git::{Workspace, WorkspaceMode};
use crate::sink::{LogSink, PipelineLog, ServiceLog};
use crate::templates::collector::DEFAULT_COIN;
use crate::templates::{DeliveryTarget, ServiceConfig, TemplateKind};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use service_store::{
    LogBroadcastHub, LogEntry, ServiceRecord, ServiceStatus, ServiceStore, derive_legacy_namespace,
    derive_namespace, workload_name,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Check the config
    Validate,
    /// Materialize application source
    GenerateCode,
    /// Clone or refresh the delivery repository
    PrepareWorkspace,
    /// Write deployment and delivery manifests
    GenerateManifests,
    /// Build the container image
    BuildImage,
    /// Make the image available to the cluster
    PublishImage,
    /// Commit and push the delivery repository
    PushToGit,
    /// Apply the delivery manifest
    Deploy,
}

impl Stage {
    /// Every stage, in execution order
    pub const ALL: [Stage; 8] = [
        Stage::Validate,
        Stage::GenerateCode,
        Stage::PrepareWorkspace,
        Stage::GenerateManifests,
        Stage::BuildImage,
        Stage::PublishImage,
        Stage::PushToGit,
        Stage::Deploy,
    ];

    /// 1-based position
    pub fn number(self) -> usize {
        self as usize + 1
    }

    /// Human label, also used as the log step tag
    pub fn label(self) -> &'static str {
        match self {
            Stage::Validate => "Validating configuration",
            Stage::GenerateCode => "Generating application code",
            Stage::PrepareWorkspace => "Preparing delivery workspace",
            Stage::GenerateManifests => "Generating manifests",
            Stage::BuildImage => "Building image",
            Stage::PublishImage => "Publishing image",
            Stage::PushToGit => "Pushing to delivery repository",
            Stage::Deploy => "Deploying",
        }
    }

    fn marker(self) -> String {
        format!("Step {}/{}: {}...", self.number(), Self::ALL.len(), self.label())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A required stage failed
#[derive(thiserror::Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    /// The failing stage
    pub stage: Stage,
    /// What went wrong
    #[source]
    pub source: Error,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, PipelineError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, PipelineError> {
        self.map_err(|source| PipelineError { stage, source })
    }
}

/// A creation request: template id plus configuration document
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    /// Template variant id
    pub template: String,
    /// Configuration; must contain `service_name`
    pub config: Map<String, Value>,
}

impl CreateRequest {
    /// Request for `template` with `config`
    pub fn new(template: impl Into<String>, config: Map<String, Value>) -> Self {
        Self {
            template: template.into(),
            config,
        }
    }

    /// Parse the configuration from a JSON object
    pub fn from_json(template: impl Into<String>, config: &str) -> Result<Self> {
        match serde_json::from_str(config)? {
            Value::Object(config) => Ok(Self::new(template, config)),
            _ => Err(Error::Validation(vec![
                "configuration must be a JSON object".to_string(),
            ])),
        }
    }

    /// Legacy positional form: name, coin and collector type
    pub fn legacy(name: &str, coin: &str, collector_type: &str) -> Self {
        let mut config = Map::new();
        config.insert("service_name".into(), name.into());
        config.insert("coin".into(), coin.into());
        config.insert("type".into(), collector_type.into());
        Self::new(TemplateKind::Collector.id(), config)
    }
}

/// A validated request, ready to register and run
#[derive(Debug, Clone)]
pub struct PreparedService {
    /// Resolved variant
    pub kind: TemplateKind,
    /// Name as requested
    pub display_name: String,
    /// Handler input
    pub config: ServiceConfig,
    /// Creation time, also encoded in legacy namespaces
    pub created_at: DateTime<Utc>,
    /// Problems that did not prevent preparation
    pub warnings: Vec<String>,
}

impl PreparedService {
    /// Store record in the `creating` status
    pub fn record(&self) -> ServiceRecord {
        let mut record = ServiceRecord::new(
            &self.display_name,
            &self.config.name,
            self.kind.id(),
            &self.config.namespace,
            self.config.params.clone(),
        );
        record.created_at = self.created_at;
        record
    }
}

/// What a successful pipeline run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// How the service was delivered
    pub mode: WorkspaceMode,
    /// Image reference that was built
    pub image: String,
    /// Generated application source
    pub code_dir: PathBuf,
    /// Best-effort stages that failed
    pub warnings: Vec<String>,
}

/// Drives template handlers through the creation pipeline
pub struct Orchestrator {
    ctx: Arc<OrchestrationContext>,
}

impl Orchestrator {
    /// Create an orchestrator over `ctx`
    pub fn new(ctx: Arc<OrchestrationContext>) -> Self {
        Self { ctx }
    }

    /// Shared context
    pub fn context(&self) -> &Arc<OrchestrationContext> {
        &self.ctx
    }

    /// Resolve, name and validate a request; touches nothing outside memory
    pub fn prepare(&self, request: CreateRequest) -> Result<PreparedService> {
        let CreateRequest { template, mut config } = request;

        let display_name = match config.get("service_name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            _ => return Err(Error::Validation(vec!["service_name is required".to_string()])),
        };

        let mut warnings = Vec::new();
        let kind = match TemplateKind::resolve(&template) {
            Some(kind) => kind,
            None => {
                warn!("Unknown template {}, using the collector", template);
                warnings.push(format!(
                    "Unknown template '{template}', creating a {} service",
                    TemplateKind::Collector
                ));
                config
                    .entry("coin")
                    .or_insert_with(|| Value::from(DEFAULT_COIN));
                config.insert("type".into(), Value::from(template.as_str()));
                TemplateKind::Collector
            }
        };

        let created_at = Utc::now();
        let name = workload_name(&display_name);
        let namespace = if kind.is_legacy() {
            derive_legacy_namespace(&display_name, created_at)
        } else {
            match config.get("namespace") {
                Some(Value::String(ns)) if !ns.trim().is_empty() => ns.trim().to_string(),
                _ => derive_namespace(&display_name),
            }
        };
        let image = self.ctx.settings.image_for(&name);

        let config = ServiceConfig::new(name, namespace, image, config);
        kind.handler().validate(&config).into_result()?;

        Ok(PreparedService {
            kind,
            display_name,
            config,
            created_at,
            warnings,
        })
    }

    /// Rebuild the prepared form of a stored record
    ///
    /// Names and namespace come from the record; the config is validated
    /// again.
    pub fn restore(&self, record: &ServiceRecord) -> Result<PreparedService> {
        let kind = TemplateKind::resolve(&record.template)
            .ok_or_else(|| Error::Config(format!("unknown template '{}'", record.template)))?;
        let config = ServiceConfig::new(
            &record.name,
            &record.namespace,
            self.ctx.settings.image_for(&record.name),
            record.config.clone(),
        );
        kind.handler().validate(&config).into_result()?;

        Ok(PreparedService {
            kind,
            display_name: record.display_name.clone(),
            config,
            created_at: record.created_at,
            warnings: Vec::new(),
        })
    }

    /// Persist the record of a prepared service and log preparation warnings
    pub async fn register(
        &self,
        prepared: &PreparedService,
        hub: &Arc<LogBroadcastHub>,
    ) -> Result<ServiceRecord> {
        let record = hub.store().create(prepared.record()).await?;
        for warning in &prepared.warnings {
            hub.publish(&record.id, LogEntry::warning(warning)).await;
        }
        Ok(record)
    }

    /// Run every stage for `prepared`, logging into `sink`
    pub async fn run_pipeline(
        &self,
        prepared: &PreparedService,
        sink: &dyn LogSink,
    ) -> std::result::Result<PipelineReport, PipelineError> {
        let root = PipelineLog::new(sink);
        info!(
            "Creating {} service {} in {}",
            prepared.kind, prepared.config.name, prepared.config.namespace
        );

        match self.execute(prepared, &root).await {
            Ok(report) => {
                root.success(format!(
                    "Service {} created successfully!",
                    prepared.config.name
                ))
                .await;
                Ok(report)
            }
            Err(e) => {
                error!("Pipeline for {} failed: {}", prepared.config.name, e);
                root.for_step(e.stage.label()).error(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        prepared: &PreparedService,
        root: &PipelineLog<'_>,
    ) -> std::result::Result<PipelineReport, PipelineError> {
        let ctx = &self.ctx;
        let handler = prepared.kind.handler();
        let config = &prepared.config;
        let mut warnings = Vec::new();

        let log = enter(root, Stage::Validate).await;
        handler.validate(config).into_result().at(Stage::Validate)?;
        log.info(format!("Template: {}", prepared.kind)).await;

        let log = enter(root, Stage::GenerateCode).await;
        let code_dir = handler
            .generate_code(config, &ctx.settings.apps_dir())
            .await
            .at(Stage::GenerateCode)?;
        log.info(format!("Generated sources in {}", code_dir.display())).await;

        // Held until the push so concurrent runs do not share a commit
        let log = enter(root, Stage::PrepareWorkspace).await;
        let session = ctx
            .git
            .ensure(ctx.settings.delivery.repo_url.as_deref())
            .await
            .at(Stage::PrepareWorkspace)?;
        for warning in &session.warnings {
            log.warning(warning.as_str()).await;
        }
        warnings.extend(session.warnings.iter().cloned());

        let log = enter(root, Stage::GenerateManifests).await;
        let mut target = DeliveryTarget::from_settings(&ctx.settings);
        if let Some(remote) = &session.remote {
            target.repo_url = remote.clone();
        }
        let files = handler
            .generate_manifests(config, &target)
            .at(Stage::GenerateManifests)?;
        session
            .write_files(&files)
            .await
            .at(Stage::GenerateManifests)?;
        log.info(format!("Wrote {} manifest files", files.len())).await;

        let log = enter(root, Stage::BuildImage).await;
        let request = BuildRequest::new(&config.name, &code_dir, &config.image);
        let image = ctx
            .builder
            .build(&request, &log)
            .await
            .at(Stage::BuildImage)?;

        let log = enter(root, Stage::PublishImage).await;
        if let Err(e) = ctx.builder.publish(&image, &log).await {
            let message = format!("Image publish failed, continuing: {e}");
            log.warning(message.as_str()).await;
            warnings.push(message);
        }

        let log = enter(root, Stage::PushToGit).await;
        let mut mode = session.mode;
        if mode == WorkspaceMode::Synced {
            let message = format!("Add service {}", config.name);
            match session.commit_and_push(&message).await {
                Ok(()) => log.success("Pushed to delivery repository").await,
                Err(e) => {
                    warn!("Push for {} failed: {}", config.name, e);
                    log.warning(format!("Git push failed, continuing with local apply: {e}"))
                        .await;
                    warnings.push(format!("Git push failed: {e}"));
                    mode = WorkspaceMode::Local;
                }
            }
        } else {
            log.info("Local delivery workspace, nothing to push").await;
        }

        let workspace = session.workspace().clone();
        drop(session);

        let log = enter(root, Stage::Deploy).await;
        self.deploy(prepared, &workspace, mode, &target, &log)
            .await
            .at(Stage::Deploy)?;

        Ok(PipelineReport {
            mode,
            image,
            code_dir,
            warnings,
        })
    }

    async fn deploy(
        &self,
        prepared: &PreparedService,
        workspace: &Workspace,
        mode: WorkspaceMode,
        target: &DeliveryTarget,
        log: &PipelineLog<'_>,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let name = &prepared.config.name;
        let application = workspace.application_file(name);

        match mode {
            WorkspaceMode::Local => {
                log.info("Applying manifests directly").await;
                ctx.process
                    .stream_checked(log, ctx.kubectl.apply_command(&workspace.manifests_dir(name)))
                    .await?;
                if target.repo_url.is_empty() {
                    log.info("No delivery repository, skipping application resource").await;
                } else {
                    ctx.process
                        .stream_checked(log, ctx.kubectl.apply_command(&application))
                        .await?;
                }
            }
            WorkspaceMode::Synced => {
                log.info("Applying delivery application").await;
                ctx.process
                    .stream_checked(log, ctx.kubectl.apply_command(&application))
                    .await?;
            }
        }

        if prepared.kind.handler().awaits_rollout() {
            if let Err(e) = ctx.kubectl.annotate_refresh(name).await {
                log.warning(format!("Could not refresh application: {e}")).await;
            }

            let timeout = Duration::from_secs(ctx.settings.cluster.rollout_timeout_secs);
            log.info(format!("Waiting up to {}s for pods to become ready", timeout.as_secs()))
                .await;
            let poll = Duration::from_secs(ctx.settings.cluster.rollout_poll_secs);
            ctx.kubectl
                .wait_pods_ready(name, &prepared.config.namespace, timeout, poll)
                .await?;
            log.success("Pods ready").await;
        }
        Ok(())
    }

    /// Run the pipeline for a registered service and settle its status
    pub async fn run_registered(
        &self,
        service_id: &str,
        prepared: &PreparedService,
        hub: &Arc<LogBroadcastHub>,
    ) -> ServiceStatus {
        let sink = ServiceLog::new(service_id, hub.clone());
        let status = match self.run_pipeline(prepared, &sink).await {
            Ok(_) => ServiceStatus::Active,
            Err(_) => ServiceStatus::Failed,
        };

        if let Err(e) = hub.store().set_status(service_id, status).await {
            error!("Failed to update status of {}: {}", service_id, e);
        }
        status
    }

    /// Register and run to completion
    pub async fn provision(
        &self,
        prepared: &PreparedService,
        hub: &Arc<LogBroadcastHub>,
    ) -> Result<ServiceRecord> {
        let record = self.register(prepared, hub).await?;
        self.run_registered(&record.id, prepared, hub).await;
        Ok(hub.store().get(&record.id).await?)
    }

    /// Validate and register synchronously, then run on a detached task
    ///
    /// Progress is only observable through the service log and the final
    /// status of the record.
    pub async fn submit(
        self: &Arc<Self>,
        request: CreateRequest,
        hub: &Arc<LogBroadcastHub>,
    ) -> Result<(ServiceRecord, smol::Task<ServiceStatus>)> {
        let prepared = self.prepare(request)?;
        let record = self.register(&prepared, hub).await?;

        let this = self.clone();
        let hub = hub.clone();
        let id = record.id.clone();
        let task = smol::spawn(async move { this.run_registered(&id, &prepared, &hub).await });
        Ok((record, task))
    }

    /// Run the pipeline again for a failed service
    pub async fn retry(&self, service_id: &str, hub: &Arc<LogBroadcastHub>) -> Result<ServiceStatus> {
        let store: &Arc<ServiceStore> = hub.store();
        let record = store.get(service_id).await?;
        let prepared = self.restore(&record)?;

        store.set_status(service_id, ServiceStatus::Creating).await?;
        hub.publish(service_id, LogEntry::info("Retrying service creation"))
            .await;
        Ok(self.run_registered(service_id, &prepared, hub).await)
    }
}

async fn enter<'a>(root: &PipelineLog<'a>, stage: Stage) -> PipelineLog<'a> {
    let log = root.for_step(stage.label());
    log.info(stage.marker()).await;
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::testing::ScriptedRunner;
    use serde_json::json;

    fn orchestrator() -> Orchestrator {
        let settings = Settings::default();
        let ctx = OrchestrationContext::with_runner(settings, Arc::new(ScriptedRunner::new()));
        Orchestrator::new(Arc::new(ctx))
    }

    fn request(template: &str, config: Value) -> CreateRequest {
        let Value::Object(config) = config else { unreachable!() };
        CreateRequest::new(template, config)
    }

    #[test]
    fn test_stage_markers() {
        assert_eq!(Stage::Validate.marker(), "Step 1/8: Validating configuration...");
        assert_eq!(Stage::Deploy.number(), 8);
        assert_eq!(Stage::PushToGit.to_string(), "Pushing to delivery repository");
    }

    #[test]
    fn test_prepare_derives_names() {
        let prepared = orchestrator()
            .prepare(request("go-service", json!({"service_name": "My_Api"})))
            .unwrap();
        assert_eq!(prepared.config.name, "my-api");
        assert_eq!(prepared.config.namespace, "my-api");
        assert_eq!(prepared.config.image, "my-api:v1.0");
        assert_eq!(prepared.display_name, "My_Api");
        assert!(prepared.warnings.is_empty());

        let record = prepared.record();
        assert_eq!(record.status, ServiceStatus::Creating);
        assert_eq!(record.template, "go-service");
        assert_eq!(record.created_at, prepared.created_at);
    }

    #[test]
    fn test_prepare_namespace_override_and_missing_name() {
        let o = orchestrator();
        let prepared = o
            .prepare(request("python-service", json!({"service_name": "worker", "namespace": "team-a"})))
            .unwrap();
        assert_eq!(prepared.config.namespace, "team-a");

        let err = o.prepare(request("go-service", json!({"port": 80}))).unwrap_err();
        assert!(matches!(err, Error::Validation(ref e) if e == &["service_name is required"]));

        let err = o
            .prepare(request("go-service", json!({"service_name": "api", "port": 0})))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_unknown_template_falls_back_to_collector() {
        let prepared = orchestrator()
            .prepare(request("price-feed", json!({"service_name": "eth"})))
            .unwrap();
        assert_eq!(prepared.kind, TemplateKind::Collector);
        assert_eq!(prepared.config.str_param("coin", ""), "btc");
        assert_eq!(prepared.config.str_param("type", ""), "price-feed");
        assert_eq!(prepared.warnings.len(), 1);

        let suffix = prepared.created_at.format("%Y%m%d%H%M%S").to_string();
        assert_eq!(prepared.config.namespace, format!("eth-{suffix}"));
    }

    #[test]
    fn test_legacy_request_and_json_parsing() {
        let req = CreateRequest::legacy("btc-ticker", "btc", "price");
        assert_eq!(req.template, "collector");
        assert_eq!(req.config["coin"], "btc");

        assert!(CreateRequest::from_json("go-service", r#"{"service_name": "a"}"#).is_ok());
        assert!(matches!(
            CreateRequest::from_json("go-service", "[1, 2]"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            CreateRequest::from_json("go-service", "{"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_restore_keeps_record_names() {
        let o = orchestrator();
        let prepared = o
            .prepare(CreateRequest::legacy("btc-ticker", "btc", "price"))
            .unwrap();
        let record = prepared.record();

        let restored = o.restore(&record).unwrap();
        assert_eq!(restored.kind, TemplateKind::Collector);
        assert_eq!(restored.config, prepared.config);
        assert_eq!(restored.created_at, prepared.created_at);
    }
}
