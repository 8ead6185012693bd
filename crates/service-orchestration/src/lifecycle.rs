//! Pause, resume and removal of provisioned services

use crate::context::OrchestrationContext;
use crate::templates::collector::config_map_name;
use crate::{Error, Result};
use service_store::{ServiceRecord, ServiceStatus, ServiceStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Non-fatal problems met while removing a service
#[derive(Debug, Clone, Default)]
pub struct RemovalReport {
    /// The record after removal, when one existed
    pub record: Option<ServiceRecord>,
    /// Cleanup steps that failed
    pub warnings: Vec<String>,
}

impl RemovalReport {
    fn warn(&mut self, step: &str, error: impl std::fmt::Display) {
        warn!("{} failed: {}", step, error);
        self.warnings.push(format!("{step}: {error}"));
    }
}

/// Drives status changes of existing services
pub struct LifecycleController {
    ctx: Arc<OrchestrationContext>,
    store: Arc<ServiceStore>,
}

impl LifecycleController {
    /// Create a controller over `ctx` and `store`
    pub fn new(ctx: Arc<OrchestrationContext>, store: Arc<ServiceStore>) -> Self {
        Self { ctx, store }
    }

    /// Scale a service to zero with reconciliation suspended
    ///
    /// Automated sync is switched off first so the delivery system does not
    /// undo the scale-down. The status only changes once the scale went
    /// through.
    pub async fn deactivate(&self, id: &str) -> Result<ServiceRecord> {
        let record = self.eligible(id, ServiceStatus::Inactive).await?;
        info!("Deactivating {} ({})", record.name, id);

        if let Err(e) = self.ctx.kubectl.set_auto_sync(&record.name, false).await {
            warn!("Could not suspend sync of {}: {}", record.name, e);
        }
        self.scale(&record, 0).await?;

        Ok(self.store.set_status(id, ServiceStatus::Inactive).await?)
    }

    /// Scale a service back to one replica and resume reconciliation
    pub async fn activate(&self, id: &str) -> Result<ServiceRecord> {
        let record = self.eligible(id, ServiceStatus::Active).await?;
        info!("Activating {} ({})", record.name, id);

        self.scale(&record, 1).await?;
        self.ctx.kubectl.set_auto_sync(&record.name, true).await?;

        Ok(self.store.set_status(id, ServiceStatus::Active).await?)
    }

    /// Load a record that may move to `next`
    ///
    /// Checked before any cluster call so a refused transition leaves the
    /// workload untouched. Only the orchestrator moves a service out of
    /// `creating`, so pause and resume need an active or inactive service.
    async fn eligible(&self, id: &str, next: ServiceStatus) -> Result<ServiceRecord> {
        let record = self.store.get(id).await?;
        let running = matches!(record.status, ServiceStatus::Active | ServiceStatus::Inactive);
        if !running || !record.status.can_transition_to(next) {
            return Err(service_store::Error::InvalidStateTransition {
                id: id.to_string(),
                from: record.status,
                to: next,
            }
            .into());
        }
        Ok(record)
    }

    /// Scale the workload of `record`
    ///
    /// Tries the deployment named after the service in its namespace, then
    /// any deployment found in that namespace, then the named deployment in
    /// the fallback namespace.
    async fn scale(&self, record: &ServiceRecord, replicas: u32) -> Result<()> {
        let kubectl = &self.ctx.kubectl;
        let name = record.name.as_str();
        let namespace = record.namespace.as_str();

        let first = match kubectl.scale(name, namespace, replicas).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!("Deployment {} not scalable in {}: {}", name, namespace, first);

        match kubectl.first_deployment(namespace).await {
            Ok(Some(found)) if found != name => {
                info!("Scaling discovered deployment {} in {}", found, namespace);
                if kubectl.scale(&found, namespace, replicas).await.is_ok() {
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Deployment discovery in {} failed: {}", namespace, e),
        }

        let fallback = self.ctx.settings.cluster.fallback_namespace.as_str();
        if fallback != namespace {
            info!("Scaling {} in fallback namespace {}", name, fallback);
            if kubectl.scale(name, fallback, replicas).await.is_ok() {
                return Ok(());
            }
        }
        Err(first)
    }

    /// Remove the cluster resources of a service and mark it deleted
    ///
    /// Resources already gone are not reported. Any other failure becomes a
    /// warning; the record is marked deleted regardless.
    pub async fn soft_delete(&self, id: &str) -> Result<RemovalReport> {
        let record = self.store.get(id).await?;
        info!("Deleting {} ({})", record.name, id);

        let mut report = RemovalReport::default();
        let kubectl = &self.ctx.kubectl;

        if let Err(e) = kubectl.delete_namespace(&record.namespace).await {
            if !e.is_not_found() {
                report.warn("Deleting namespace", e);
            }
        }
        if let Err(e) = kubectl.delete_application(&record.name).await {
            if !e.is_not_found() {
                report.warn("Deleting application", e);
            }
        }

        report.record = Some(self.store.mark_deleted(id).await?);
        Ok(report)
    }

    /// Legacy removal by name
    ///
    /// Suspends sync, removes the service from the delivery repository and
    /// pushes, then deletes the application, workload resources and
    /// namespace. Every failure is collected; a matching record is marked
    /// deleted at the end.
    pub async fn decommission(&self, name: &str, coin: &str, collector_type: &str) -> Result<RemovalReport> {
        let ctx = &self.ctx;
        let kubectl = &ctx.kubectl;
        let existing = self.store.find_by_name(name).await?;
        let namespace = existing
            .as_ref()
            .map(|r| r.namespace.clone())
            .unwrap_or_else(|| name.to_string());
        info!(
            "Removing {} collector {} ({}) from {}",
            coin, name, collector_type, namespace
        );

        let mut report = RemovalReport::default();

        if let Err(e) = kubectl.clear_sync_policy(name).await {
            if !e.is_not_found() {
                report.warn("Suspending sync", e);
            }
        }

        match ctx.git.ensure(ctx.settings.delivery.repo_url.as_deref()).await {
            Ok(session) => {
                let mut paths = vec![session.application_file(name), session.manifests_dir(name)];
                paths.push(ctx.settings.apps_dir().join(name));
                match session.remove_paths(&paths).await {
                    Ok(removed) => info!("Removed {} paths of {}", removed.len(), name),
                    Err(e) => report.warn("Removing files", e),
                }
                if session.remote.is_some() {
                    let message = format!("Remove service {name}");
                    if let Err(e) = session.commit_and_push(&message).await {
                        report.warn("Pushing removal", e);
                    }
                }
            }
            Err(e) => report.warn("Preparing delivery workspace", e),
        }

        let steps: [(&str, Result<()>); 5] = [
            ("Deleting application", kubectl.delete_application(name).await),
            ("Deleting deployment", kubectl.delete("deployment", name, &namespace).await),
            ("Deleting service", kubectl.delete("service", name, &namespace).await),
            (
                "Deleting config map",
                kubectl.delete("configmap", &config_map_name(name), &namespace).await,
            ),
            ("Deleting namespace", kubectl.delete_namespace(&namespace).await),
        ];
        for (step, result) in steps {
            match result {
                Err(e) if !e.is_not_found() => report.warn(step, e),
                _ => {}
            }
        }

        if let Some(record) = existing {
            report.record = Some(self.store.mark_deleted(&record.id).await?);
        }
        Ok(report)
    }

    /// Look a record up by id
    pub async fn get(&self, id: &str) -> Result<ServiceRecord> {
        self.store.get(id).await.map_err(Error::from)
    }
}
