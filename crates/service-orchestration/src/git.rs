//! Delivery repository workspace
//!
//! One persistent checkout of the delivery repository is shared by every
//! pipeline run. [`GitSyncManager::ensure`] hands out a [`WorkspaceSession`]
//! that holds the workspace lock until it is dropped, so one run's pull,
//! writes, commit and push never interleave with another's.

use crate::cluster::Reachability;
use crate::config::GitSettings;
use crate::executors::CommandRunner;
use crate::Result;
use command_executor::Command;
use futures::lock::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the delivery workspace is connected to its remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceMode {
    /// A checkout with an `origin` remote that changes are pushed to
    Synced,
    /// A plain directory tree; manifests are applied directly
    Local,
}

/// A prepared delivery workspace
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Connection mode
    pub mode: WorkspaceMode,
    /// Root of the tree manifests are written into
    pub path: PathBuf,
    /// Normalized remote URL in synced mode
    pub remote: Option<String>,
    /// Non-fatal problems met while preparing it
    pub warnings: Vec<String>,
}

impl Workspace {
    /// Directory the delivery manifests of `name` live in
    pub fn manifests_dir(&self, name: &str) -> PathBuf {
        self.path.join("delivery").join("manifests").join(name)
    }

    /// Path of the application resource of `name`
    pub fn application_file(&self, name: &str) -> PathBuf {
        self.path
            .join("delivery")
            .join("applications")
            .join(format!("{name}.yaml"))
    }
}

/// Rewrite an HTTPS repository URL into its SSH form
///
/// `https://github.com/acme/infra` becomes `git@github.com:acme/infra.git`.
/// Anything that is not HTTPS is returned unchanged.
pub fn normalize_repo_url(url: &str) -> String {
    let url = url.trim();
    let Some(rest) = url.strip_prefix("https://") else {
        return url.to_string();
    };
    let Some((host, path)) = rest.split_once('/') else {
        return url.to_string();
    };

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    format!("git@{host}:{path}.git")
}

/// Owns the delivery repository checkout
pub struct GitSyncManager {
    runner: Arc<dyn CommandRunner>,
    settings: GitSettings,
    workspace_dir: PathBuf,
    local_dir: PathBuf,
    lock: Mutex<()>,
}

impl GitSyncManager {
    /// Manage the checkout at `workspace_dir`, falling back to `local_dir`
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: GitSettings,
        workspace_dir: impl Into<PathBuf>,
        local_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            settings,
            workspace_dir: workspace_dir.into(),
            local_dir: local_dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// Persistent checkout directory
    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    fn git(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(ssh) = &self.settings.ssh_command {
            cmd.env("GIT_SSH_COMMAND", ssh);
        }
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Prepare the workspace for `repo_url`
    ///
    /// - no URL: the local directory tree is used
    /// - no checkout yet: clone, or if that fails (or yields no
    ///   repository) initialize one with `origin` and a main branch
    /// - existing checkout: pull with rebase; a failed pull only warns
    ///
    /// Waits for any other session to finish first.
    pub async fn ensure(&self, repo_url: Option<&str>) -> Result<WorkspaceSession<'_>> {
        let guard = self.lock.lock().await;
        let workspace = self.prepare(repo_url).await?;
        Ok(WorkspaceSession {
            manager: self,
            workspace,
            _guard: guard,
        })
    }

    async fn prepare(&self, repo_url: Option<&str>) -> Result<Workspace> {
        let Some(repo_url) = repo_url.map(str::trim).filter(|u| !u.is_empty()) else {
            info!("No delivery repository configured, using {:?}", self.local_dir);
            return self
                .local_workspace(vec!["No delivery repository configured".to_string()])
                .await;
        };

        let remote = normalize_repo_url(repo_url);
        if remote != repo_url {
            debug!("Using SSH form of delivery repository: {}", remote);
        }

        let mut warnings = Vec::new();
        let dir = &self.workspace_dir;

        if dir.join(".git").exists() {
            info!("Pulling latest delivery changes into {:?}", dir);
            let mut pull = self.git(Some(dir));
            pull.args(["pull", "--rebase"]);
            if let Err(e) = self.runner.run_checked(pull).await {
                warn!("Pull of delivery workspace failed: {}", e);
                warnings.push(format!("Pull failed, using existing workspace: {e}"));
            }
        } else {
            if let Some(parent) = dir.parent() {
                async_fs::create_dir_all(parent).await?;
            }

            info!("Cloning {} into {:?}", remote, dir);
            let mut clone = self.git(None);
            clone.arg("clone").arg(&remote).arg(dir);
            if let Err(e) = self.runner.run_checked(clone).await {
                warn!("Clone of {} failed: {}", remote, e);
                warnings.push(format!("Clone failed, initializing a new repository: {e}"));
            }

            if !dir.join(".git").exists() {
                if let Err(e) = self.init_repository(&remote).await {
                    warn!("Could not initialize delivery workspace: {}", e);
                    warnings.push(format!("Falling back to a local delivery tree: {e}"));
                    return self.local_workspace(warnings).await;
                }
            }
        }

        Ok(Workspace {
            mode: WorkspaceMode::Synced,
            path: dir.clone(),
            remote: Some(remote),
            warnings,
        })
    }

    async fn local_workspace(&self, warnings: Vec<String>) -> Result<Workspace> {
        async_fs::create_dir_all(&self.local_dir).await?;
        Ok(Workspace {
            mode: WorkspaceMode::Local,
            path: self.local_dir.clone(),
            remote: None,
            warnings,
        })
    }

    async fn init_repository(&self, remote: &str) -> Result<()> {
        let dir = &self.workspace_dir;
        async_fs::create_dir_all(dir).await?;

        let mut init = self.git(Some(dir));
        init.arg("init");
        self.runner.run_checked(init).await?;

        let mut add_remote = self.git(Some(dir));
        add_remote.args(["remote", "add", "origin", remote]);
        self.runner.run_checked(add_remote).await?;

        // Fails harmlessly when the default branch already has this name
        let mut checkout = self.git(Some(dir));
        checkout.args(["checkout", "-b", self.settings.branch.as_str()]);
        let _ = self.runner.output(checkout).await?;
        Ok(())
    }

    /// Whether the delivery remote answers
    pub async fn remote_status(&self, repo_url: &str) -> Reachability {
        let mut ls = self.git(None);
        ls.args(["ls-remote", "--heads"]).arg(normalize_repo_url(repo_url));
        Reachability::from_result(self.runner.run_checked(ls).await)
    }
}

/// Exclusive use of the delivery workspace
///
/// Dereferences to the prepared [`Workspace`]. Dropping it releases the
/// workspace for the next run.
pub struct WorkspaceSession<'a> {
    manager: &'a GitSyncManager,
    workspace: Workspace,
    _guard: MutexGuard<'a, ()>,
}

impl Deref for WorkspaceSession<'_> {
    type Target = Workspace;

    fn deref(&self) -> &Workspace {
        &self.workspace
    }
}

impl WorkspaceSession<'_> {
    /// The prepared workspace
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Write `files` (relative path to content) below the workspace root
    pub async fn write_files(&self, files: &BTreeMap<String, String>) -> Result<()> {
        for (relative, content) in files {
            let path = self.workspace.path.join(relative);
            if let Some(parent) = path.parent() {
                async_fs::create_dir_all(parent).await?;
            }
            async_fs::write(&path, content).await?;
            debug!("Wrote {:?}", path);
        }
        Ok(())
    }

    /// Remove files or directory trees; missing paths are skipped
    ///
    /// Returns the paths that existed and were removed.
    pub async fn remove_paths(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for path in paths {
            let Ok(meta) = async_fs::metadata(path).await else {
                continue;
            };
            if meta.is_dir() {
                async_fs::remove_dir_all(path).await?;
            } else {
                async_fs::remove_file(path).await?;
            }
            removed.push(path.clone());
        }
        Ok(removed)
    }

    /// Commit every pending change under the bot identity and push
    ///
    /// A clean tree skips the commit but still pushes, so earlier
    /// unpushed commits go out.
    pub async fn commit_and_push(&self, message: &str) -> Result<()> {
        let manager = self.manager;
        let settings = &manager.settings;
        let dir = self.workspace.path.as_path();

        let mut add = manager.git(Some(dir));
        add.args(["add", "-A"]);
        manager.runner.run_checked(add).await?;

        let mut status = manager.git(Some(dir));
        status.args(["status", "--porcelain"]);
        let pending = manager.runner.run_checked(status).await?;

        if pending.stdout_trimmed().is_empty() {
            debug!("Delivery workspace clean, nothing to commit");
        } else {
            let mut commit = manager.git(Some(dir));
            commit
                .arg("-c")
                .arg(format!("user.name={}", settings.author_name))
                .arg("-c")
                .arg(format!("user.email={}", settings.author_email))
                .args(["commit", "-m", message]);
            manager.runner.run_checked(commit).await?;
        }

        let mut push = manager.git(Some(dir));
        push.args(["push", "-u", "origin", settings.branch.as_str()]);
        manager.runner.run_checked(push).await?;

        info!("Pushed delivery changes: {}", message);
        Ok(())
    }
}
