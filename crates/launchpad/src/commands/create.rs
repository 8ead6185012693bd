use super::{App, finish, follow};
use anyhow::{Context, Result};
use service_orchestration::{CreateRequest, Orchestrator};
use std::process::ExitCode;

pub async fn run(app: &App, template: String, config: String) -> Result<ExitCode> {
    let request = CreateRequest::from_json(template, &config).context("Invalid service configuration")?;
    provision(app, request).await
}

pub async fn legacy(app: &App, name: &str, coin: &str, collector_type: &str) -> Result<ExitCode> {
    provision(app, CreateRequest::legacy(name, coin, collector_type)).await
}

/// Validate, register and run the pipeline in this process
async fn provision(app: &App, request: CreateRequest) -> Result<ExitCode> {
    let orchestrator = Orchestrator::new(app.ctx.clone());
    let prepared = orchestrator.prepare(request)?;

    let hub = app.hub().await?;
    let record = orchestrator.register(&prepared, &hub).await?;
    println!("Creating service {} ({})", record.display_name, record.id);

    let status = follow(
        &hub,
        &record.id,
        orchestrator.run_registered(&record.id, &prepared, &hub),
    )
    .await?;
    Ok(finish(&record.display_name, status))
}

pub async fn retry(app: &App, id: &str) -> Result<ExitCode> {
    let orchestrator = Orchestrator::new(app.ctx.clone());
    let hub = app.hub().await?;
    let record = hub.store().get(id).await?;

    let status = follow(&hub, id, orchestrator.retry(id, &hub))
        .await?
        .with_context(|| format!("Cannot retry {}", record.display_name))?;
    Ok(finish(&record.display_name, status))
}
