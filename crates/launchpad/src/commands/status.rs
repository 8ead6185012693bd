use super::App;
use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table};
use service_orchestration::Reachability;
use std::process::ExitCode;
use std::time::Duration;

pub async fn run(app: &App) -> Result<ExitCode> {
    let settings = app.settings();
    let mut table = Table::new();
    table.set_header(vec!["COMPONENT", "TARGET", "STATUS"]);

    let cluster = app.ctx.kubectl.cluster_status().await;
    add_probe(&mut table, "cluster", &settings.cluster.kubectl, &cluster);
    let mut reachable = cluster.is_reachable();

    match settings.delivery.repo_url.as_deref() {
        Some(repo) => {
            let remote = app.ctx.git.remote_status(repo).await;
            add_probe(&mut table, "delivery repository", repo, &remote);
            reachable &= remote.is_reachable();
        }
        None => {
            table.add_row(vec![
                Cell::new("delivery repository"),
                Cell::new("-"),
                Cell::new("local only").fg(Color::DarkGrey),
            ]);
        }
    }

    println!("{table}");
    Ok(if reachable { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn add_probe(table: &mut Table, component: &str, target: &str, probe: &Reachability) {
    let color = if probe.is_reachable() { Color::Green } else { Color::Red };
    table.add_row(vec![
        Cell::new(component),
        Cell::new(target),
        Cell::new(probe).fg(color),
    ]);
}

pub async fn prune_builds(app: &App, max_age_hours: Option<u64>) -> Result<ExitCode> {
    let hours = max_age_hours.unwrap_or(app.settings().builder.retention_hours);
    let deleted = app
        .ctx
        .job_builder()
        .cleanup_old_jobs(Duration::from_secs(hours * 3600))
        .await
        .context("Failed to list build jobs")?;

    println!("Deleted {deleted} build jobs older than {hours}h");
    Ok(ExitCode::SUCCESS)
}
