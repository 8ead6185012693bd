use super::App;
use anyhow::{Context, Result};
use service_orchestration::{LifecycleController, RemovalReport};
use std::process::ExitCode;

async fn controller(app: &App) -> Result<LifecycleController> {
    Ok(LifecycleController::new(app.ctx.clone(), app.store().await?))
}

pub async fn pause(app: &App, id: &str) -> Result<ExitCode> {
    let record = controller(app)
        .await?
        .deactivate(id)
        .await
        .with_context(|| format!("Failed to pause {id}"))?;
    println!("✓ Service {} paused", record.display_name);
    Ok(ExitCode::SUCCESS)
}

pub async fn resume(app: &App, id: &str) -> Result<ExitCode> {
    let record = controller(app)
        .await?
        .activate(id)
        .await
        .with_context(|| format!("Failed to resume {id}"))?;
    println!("✓ Service {} resumed", record.display_name);
    Ok(ExitCode::SUCCESS)
}

pub async fn delete(app: &App, id: &str) -> Result<ExitCode> {
    let report = controller(app)
        .await?
        .soft_delete(id)
        .await
        .with_context(|| format!("Failed to delete {id}"))?;
    Ok(summarize(id, &report))
}

pub async fn decommission(app: &App, name: &str, coin: &str, collector_type: &str) -> Result<ExitCode> {
    let report = controller(app)
        .await?
        .decommission(name, coin, collector_type)
        .await
        .with_context(|| format!("Failed to remove {name}"))?;
    Ok(summarize(name, &report))
}

fn summarize(target: &str, report: &RemovalReport) -> ExitCode {
    let name = report
        .record
        .as_ref()
        .map_or(target, |record| record.display_name.as_str());
    for warning in &report.warnings {
        eprintln!("⚠️  {warning}");
    }
    println!("✓ Service {name} deleted");
    ExitCode::SUCCESS
}
