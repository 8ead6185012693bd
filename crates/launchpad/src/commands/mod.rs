pub mod create;
pub mod launch;
pub mod lifecycle;
pub mod list;
pub mod logs;
pub mod status;

use anyhow::{Context, Result};
use service_orchestration::{ConsoleLog, OrchestrationContext, Settings};
use service_store::{LogBroadcastHub, ServiceStatus, ServiceStore};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

/// Settings and context shared by every command
pub struct App {
    /// Settings file given on the command line
    pub config_path: Option<PathBuf>,
    pub ctx: Arc<OrchestrationContext>,
}

impl App {
    pub async fn load(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let mut settings = Settings::load(config_path.as_deref())
            .await
            .context("Failed to load settings")?;
        if let Some(dir) = data_dir {
            settings.data_dir = dir;
        }
        debug!("Data directory: {:?}", settings.data_dir);

        Ok(Self {
            config_path,
            ctx: Arc::new(OrchestrationContext::new(settings)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.ctx.settings
    }

    /// Open the persistent store; holds an exclusive lock until dropped
    pub async fn store(&self) -> Result<Arc<ServiceStore>> {
        let path = self.settings().store_path();
        let store = ServiceStore::open(&path)
            .await
            .with_context(|| format!("Failed to open service store at {}", path.display()))?;
        Ok(Arc::new(store))
    }

    pub async fn hub(&self) -> Result<Arc<LogBroadcastHub>> {
        Ok(Arc::new(LogBroadcastHub::new(self.store().await?)))
    }
}

/// Print the log of `service_id` while `work` runs
///
/// History is replayed first. Printing stops once `work` has finished and
/// everything it logged has been shown; the log is then flushed to disk.
pub async fn follow<T>(
    hub: &Arc<LogBroadcastHub>,
    service_id: &str,
    work: impl Future<Output = T>,
) -> Result<T> {
    let subscription = hub.subscribe(service_id).await?;
    let receiver = subscription.receiver;
    let printer = smol::spawn(async move {
        while let Ok(entry) = receiver.recv().await {
            println!("{}", ConsoleLog::render(&entry));
        }
    });

    let output = work.await;

    // Dropping the sender closes the channel once it is drained
    hub.disconnect(service_id, &subscription.id).await;
    printer.await;
    hub.store().flush().await?;
    Ok(output)
}

/// Report the final status of a pipeline run
pub fn finish(name: &str, status: ServiceStatus) -> ExitCode {
    if status == ServiceStatus::Active {
        println!("Service {name} is {status}");
        ExitCode::SUCCESS
    } else {
        eprintln!("Service {name} is {status}");
        ExitCode::FAILURE
    }
}
