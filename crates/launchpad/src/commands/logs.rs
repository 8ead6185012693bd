use super::App;
use anyhow::{Context, Result};
use service_store::LogEntry;
use std::process::ExitCode;

pub async fn run(app: &App, id: &str, json: bool) -> Result<ExitCode> {
    let store = app.store().await?;
    let record = store.get(id).await?;
    let history = store
        .history(id)
        .await
        .with_context(|| format!("Failed to read the log of {}", record.display_name))?;

    for entry in &history {
        if json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            println!("{}", render(entry));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn render(entry: &LogEntry) -> String {
    let time = entry.timestamp.format("%H:%M:%S");
    let level = entry.level.to_string();
    match &entry.step {
        Some(step) => format!("{time} {level:<7} [{step}] {}", entry.message),
        None => format!("{time} {level:<7} {}", entry.message),
    }
}
