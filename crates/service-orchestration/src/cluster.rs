//! Cluster client calls
//!
//! Thin wrappers over `kubectl`. Each call is an explicit argument vector;
//! names that come from user input are passed as single arguments and
//! never interpreted by a shell.

use crate::executors::CommandRunner;
use crate::{Error, Result};
use command_executor::{Command, ExitResult};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Annotation that makes the delivery controller re-read the repository
pub const REFRESH_ANNOTATION: &str = "argocd.argoproj.io/refresh=hard";

/// Whether an external system answered a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum Reachability {
    /// The system answered
    Reachable,
    /// The probe failed, with the reason
    Unreachable(String),
}

impl Reachability {
    /// Reachable when `result` is `Ok`
    pub fn from_result<T>(result: Result<T>) -> Self {
        match result {
            Ok(_) => Reachability::Reachable,
            Err(e) => Reachability::Unreachable(e.to_string()),
        }
    }

    /// Whether the probe succeeded
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable)
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reachability::Reachable => write!(f, "connected"),
            Reachability::Unreachable(reason) => write!(f, "unreachable: {reason}"),
        }
    }
}

/// Automated sync policy patch for an application resource
///
/// Enabled means prune and self-heal; disabled clears `automated`.
pub fn sync_policy_patch(enabled: bool) -> Value {
    let automated = if enabled {
        json!({ "prune": true, "selfHeal": true })
    } else {
        Value::Null
    };
    json!({ "spec": { "syncPolicy": { "automated": automated } } })
}

/// `kubectl` bound to one binary and delivery namespace
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    program: String,
    app_namespace: String,
}

impl Kubectl {
    /// Client running `program`, with application resources in `app_namespace`
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        program: impl Into<String>,
        app_namespace: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            app_namespace: app_namespace.into(),
        }
    }

    /// Namespace holding application resources
    pub fn app_namespace(&self) -> &str {
        &self.app_namespace
    }

    /// A bare `kubectl` invocation
    pub fn command(&self) -> Command {
        Command::new(&self.program)
    }

    async fn run(&self, command: Command) -> Result<ExitResult> {
        debug!("kubectl: {}", command);
        self.runner.run_checked(command).await
    }

    /// `kubectl apply -f <path>`; `path` may be a file or a directory
    pub fn apply_command(&self, path: &Path) -> Command {
        let mut cmd = self.command();
        cmd.arg("apply").arg("-f").arg(path);
        cmd
    }

    /// Apply a manifest file or directory
    pub async fn apply_path(&self, path: &Path) -> Result<()> {
        self.run(self.apply_command(path)).await?;
        Ok(())
    }

    /// Create resources from a manifest file
    pub async fn create_from_file(&self, path: &Path) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("create").arg("-f").arg(path);
        self.run(cmd).await?;
        Ok(())
    }

    /// Scale a deployment
    pub async fn scale(&self, deployment: &str, namespace: &str, replicas: u32) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["scale", "deployment", deployment, "-n", namespace])
            .arg(format!("--replicas={replicas}"));
        self.run(cmd).await?;
        info!("Scaled {}/{} to {}", namespace, deployment, replicas);
        Ok(())
    }

    /// Name of the first deployment in `namespace`, if any
    pub async fn first_deployment(&self, namespace: &str) -> Result<Option<String>> {
        let mut cmd = self.command();
        cmd.args([
            "get",
            "deployments",
            "-n",
            namespace,
            "-o",
            "jsonpath={.items[0].metadata.name}",
        ]);
        let result = self.run(cmd).await?;
        let name = result.stdout_trimmed();
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    /// Merge-patch an application resource
    pub async fn patch_application(&self, app: &str, patch: &Value) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["patch", "application", app, "-n", self.app_namespace.as_str()])
            .args(["--type", "merge", "-p"])
            .arg(patch.to_string());
        self.run(cmd).await?;
        Ok(())
    }

    /// Turn automated reconciliation of `app` on (prune and self-heal) or off
    pub async fn set_auto_sync(&self, app: &str, enabled: bool) -> Result<()> {
        self.patch_application(app, &sync_policy_patch(enabled)).await?;
        info!(
            "Automated sync of {} {}",
            app,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Drop the whole sync policy of `app`
    pub async fn clear_sync_policy(&self, app: &str) -> Result<()> {
        self.patch_application(app, &json!({ "spec": { "syncPolicy": null } }))
            .await
    }

    /// Ask the delivery controller to hard-refresh `app`
    pub async fn annotate_refresh(&self, app: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args([
            "-n",
            self.app_namespace.as_str(),
            "annotate",
            "application",
            app,
            REFRESH_ANNOTATION,
            "--overwrite",
        ]);
        self.run(cmd).await?;
        Ok(())
    }

    /// Delete a namespaced resource without waiting; absent resources are fine
    pub async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args([
            "delete",
            kind,
            name,
            "-n",
            namespace,
            "--ignore-not-found=true",
            "--wait=false",
        ]);
        self.run(cmd).await?;
        Ok(())
    }

    /// Delete the application resource of `app`
    pub async fn delete_application(&self, app: &str) -> Result<()> {
        let namespace = self.app_namespace.clone();
        self.delete("application", app, &namespace).await
    }

    /// Delete a namespace and everything in it
    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args([
            "delete",
            "namespace",
            namespace,
            "--ignore-not-found=true",
            "--wait=false",
        ]);
        self.run(cmd).await?;
        Ok(())
    }

    /// Wait until pods labelled `app=<app>` are ready
    ///
    /// Polls every `poll` for the deployment to appear, then for its pods to
    /// report ready. The whole wait is bounded by `timeout`.
    pub async fn wait_pods_ready(
        &self,
        app: &str,
        namespace: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let timed_out = || Error::Timeout {
            operation: format!("pods of {app} in {namespace} becoming ready"),
            after: timeout,
        };

        // The delivery controller creates the deployment some time after
        // the application is applied
        loop {
            if self.deployment_exists(app, namespace).await? {
                break;
            }
            debug!("Deployment {}/{} not created yet", namespace, app);
            if Instant::now() + poll >= deadline {
                return Err(timed_out());
            }
            smol::Timer::after(poll).await;
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let secs = remaining.as_millis().div_ceil(1000).max(1);
            let mut cmd = self.command();
            cmd.args(["wait", "--for=condition=Ready", "pod", "-l"])
                .arg(format!("app={app}"))
                .args(["-n", namespace])
                .arg(format!("--timeout={secs}s"));

            match self.run(cmd).await {
                Ok(_) => return Ok(()),
                Err(Error::ExternalTool { detail, .. }) if detail.contains("timed out") => {
                    return Err(timed_out());
                }
                // Pods of a fresh deployment may not be scheduled yet
                Err(Error::ExternalTool { detail, .. })
                    if detail.contains("no matching resources") =>
                {
                    if Instant::now() + poll >= deadline {
                        return Err(timed_out());
                    }
                    smol::Timer::after(poll).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether deployment `name` exists in `namespace`
    pub async fn deployment_exists(&self, name: &str, namespace: &str) -> Result<bool> {
        let mut cmd = self.command();
        cmd.args(["get", "deployment", name, "-n", namespace, "-o", "name"]);
        match self.run(cmd).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetch one resource as JSON
    pub async fn get_json(&self, kind: &str, name: &str, namespace: &str) -> Result<Value> {
        let mut cmd = self.command();
        cmd.args(["get", kind, name, "-n", namespace, "-o", "json"]);
        let result = self.run(cmd).await?;
        Ok(serde_json::from_str(&result.stdout)?)
    }

    /// List resources matching `selector` as JSON objects
    pub async fn list_json(&self, kind: &str, namespace: &str, selector: &str) -> Result<Vec<Value>> {
        let mut cmd = self.command();
        cmd.args(["get", kind, "-n", namespace, "-l", selector, "-o", "json"]);
        let result = self.run(cmd).await?;
        let list: Value = serde_json::from_str(&result.stdout)?;
        Ok(match list.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        })
    }

    /// Delete a resource, letting the cluster remove dependents in the background
    pub async fn delete_in_background(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args([
            "delete",
            kind,
            name,
            "-n",
            namespace,
            "--cascade=background",
            "--ignore-not-found=true",
        ]);
        self.run(cmd).await?;
        Ok(())
    }

    /// Command following the logs of `pod`
    pub fn logs_command(&self, pod: &str, namespace: &str) -> Command {
        let mut cmd = self.command();
        cmd.args(["logs", "-f", pod, "-n", namespace]);
        cmd
    }

    /// Whether the cluster and its delivery controller answer
    pub async fn cluster_status(&self) -> Reachability {
        let mut cmd = self.command();
        cmd.args([
            "get",
            "applications",
            "-n",
            self.app_namespace.as_str(),
            "--no-headers",
        ]);
        Reachability::from_result(self.run(cmd).await)
    }
}
