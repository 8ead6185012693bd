//! Delivery application resource and repository layout

use crate::config::Settings;
use crate::git::normalize_repo_url;
use serde::{Deserialize, Serialize};

/// Repository path of the deployment manifests of `name`
pub fn manifests_path(name: &str) -> String {
    format!("delivery/manifests/{name}")
}

/// Repository path of the application resource of `name`
pub fn application_path(name: &str) -> String {
    format!("delivery/applications/{name}.yaml")
}

/// Where application resources point the delivery controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    /// Repository the controller syncs from
    pub repo_url: String,
    /// Tracked revision
    pub revision: String,
    /// Controller project
    pub project: String,
    /// Namespace application resources live in
    pub app_namespace: String,
    /// Cluster API server to deploy to
    pub destination_server: String,
}

impl DeliveryTarget {
    /// Target for the configured delivery repository
    pub fn from_settings(settings: &Settings) -> Self {
        let delivery = &settings.delivery;
        Self {
            repo_url: delivery
                .repo_url
                .as_deref()
                .map(normalize_repo_url)
                .unwrap_or_default(),
            revision: delivery.revision.clone(),
            project: delivery.project.clone(),
            app_namespace: delivery.app_namespace.clone(),
            destination_server: delivery.destination_server.clone(),
        }
    }
}

/// Application resource of the delivery controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Resource API version
    pub api_version: String,
    /// Resource kind
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Resource spec
    pub spec: ApplicationSpec,
}

/// Name and namespace of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
}

/// What to sync, where to, and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Controller project
    pub project: String,
    /// Manifest source
    pub source: ApplicationSource,
    /// Deployment destination
    pub destination: ApplicationDestination,
    /// Reconciliation policy
    pub sync_policy: SyncPolicy,
}

/// Manifest source in the delivery repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    /// Repository URL
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Tracked revision
    pub target_revision: String,
    /// Manifest directory in the repository
    pub path: String,
}

/// Deployment destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDestination {
    /// Cluster API server
    pub server: String,
    /// Target namespace
    pub namespace: String,
}

/// Reconciliation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    /// Automated sync; `None` means manual
    pub automated: Option<AutomatedSync>,
    /// Extra sync options
    #[serde(default)]
    pub sync_options: Vec<String>,
}

/// Automated sync settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedSync {
    /// Delete resources no longer declared
    pub prune: bool,
    /// Revert manual drift
    pub self_heal: bool,
}

impl Application {
    /// Application resource deploying `name` into `namespace`
    ///
    /// Sync is automated with prune and self-heal, and the destination
    /// namespace is created on demand.
    pub fn for_service(name: &str, namespace: &str, target: &DeliveryTarget) -> Self {
        Self {
            api_version: "argoproj.io/v1alpha1".to_string(),
            kind: "Application".to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: target.app_namespace.clone(),
            },
            spec: ApplicationSpec {
                project: target.project.clone(),
                source: ApplicationSource {
                    repo_url: target.repo_url.clone(),
                    target_revision: target.revision.clone(),
                    path: manifests_path(name),
                },
                destination: ApplicationDestination {
                    server: target.destination_server.clone(),
                    namespace: namespace.to_string(),
                },
                sync_policy: SyncPolicy {
                    automated: Some(AutomatedSync {
                        prune: true,
                        self_heal: true,
                    }),
                    sync_options: vec!["CreateNamespace=true".to_string()],
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_wire_shape() {
        let mut settings = Settings::default();
        settings.delivery.repo_url = Some("https://github.com/acme/infra".into());
        let target = DeliveryTarget::from_settings(&settings);

        let app = Application::for_service("demo", "demo", &target);
        let yaml = serde_yaml::to_string(&app).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(doc["apiVersion"], "argoproj.io/v1alpha1");
        assert_eq!(doc["metadata"]["namespace"], "argocd");
        assert_eq!(doc["spec"]["source"]["repoURL"], "git@github.com:acme/infra.git");
        assert_eq!(doc["spec"]["source"]["path"], "delivery/manifests/demo");
        assert_eq!(doc["spec"]["destination"]["namespace"], "demo");
        assert_eq!(doc["spec"]["syncPolicy"]["automated"]["prune"], true);
        assert_eq!(doc["spec"]["syncPolicy"]["automated"]["selfHeal"], true);
        assert_eq!(doc["spec"]["syncPolicy"]["syncOptions"][0], "CreateNamespace=true");
    }
}
