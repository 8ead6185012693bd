//! Pipeline runs in a child process
//!
//! The parent owns the store; the worker only prints marked log lines and
//! reports the outcome through its exit code.

use super::{App, finish, follow};
use anyhow::{Context, Result};
use command_executor::Command;
use service_orchestration::{ConsoleLog, CreateRequest, Orchestrator};
use service_store::ServiceRecord;
use std::path::Path;
use std::process::ExitCode;
use tracing::debug;

pub async fn run(app: &App, template: String, config: String) -> Result<ExitCode> {
    let request = CreateRequest::from_json(template, &config).context("Invalid service configuration")?;
    let orchestrator = Orchestrator::new(app.ctx.clone());
    let prepared = orchestrator.prepare(request)?;

    let hub = app.hub().await?;
    let record = orchestrator.register(&prepared, &hub).await?;
    println!("Launching service {} ({})", record.display_name, record.id);

    let program = std::env::current_exe().context("Cannot locate the launchpad binary")?;
    let command = worker_command(&program, app, &record)?;
    let status = follow(
        &hub,
        &record.id,
        app.ctx.process.run_command(&hub, &record.id, command),
    )
    .await?;
    Ok(finish(&record.display_name, status))
}

/// Command line re-running this binary in worker mode for `record`
pub fn worker_command(program: &Path, app: &App, record: &ServiceRecord) -> Result<Command> {
    let mut command = Command::new(program);
    if let Some(config) = &app.config_path {
        command.arg("--config").arg(config);
    }
    command
        .arg("--data-dir")
        .arg(&app.settings().data_dir)
        .arg("worker")
        .arg("--record")
        .arg(serde_json::to_string(record)?);
    Ok(command)
}

pub async fn worker(app: &App, record: &str) -> Result<ExitCode> {
    let record: ServiceRecord = serde_json::from_str(record).context("Invalid service record")?;
    let orchestrator = Orchestrator::new(app.ctx.clone());
    let prepared = orchestrator.restore(&record)?;

    match orchestrator.run_pipeline(&prepared, &ConsoleLog).await {
        Ok(report) => {
            debug!("Worker finished {} ({:?})", record.name, report.mode);
            Ok(ExitCode::SUCCESS)
        }
        // Already logged under the failing step
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use service_orchestration::{OrchestrationContext, Settings};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn app(config_path: Option<PathBuf>) -> App {
        let settings = Settings {
            data_dir: PathBuf::from("/var/lib/launchpad"),
            ..Settings::default()
        };
        App {
            config_path,
            ctx: Arc::new(OrchestrationContext::new(settings)),
        }
    }

    #[test]
    fn test_worker_command_carries_record_and_state() {
        let record = ServiceRecord::new("Demo", "demo", "go-service", "demo", Map::new());
        let command = worker_command(
            Path::new("/usr/bin/launchpad"),
            &app(Some(PathBuf::from("/etc/launchpad.yaml"))),
            &record,
        )
        .unwrap();

        let argv = command.argv();
        assert_eq!(
            &argv[..7],
            &[
                "/usr/bin/launchpad",
                "--config",
                "/etc/launchpad.yaml",
                "--data-dir",
                "/var/lib/launchpad",
                "worker",
                "--record"
            ]
        );
        let sent: ServiceRecord = serde_json::from_str(&argv[7]).unwrap();
        assert_eq!(sent, record);
    }

    #[test]
    fn test_worker_command_without_config_file() {
        let record = ServiceRecord::new("Demo", "demo", "go-service", "demo", Map::new());
        let command = worker_command(Path::new("launchpad"), &app(None), &record).unwrap();
        assert_eq!(command.argv()[1], "--data-dir");
        assert_eq!(command.argv().len(), 6);
    }
}
