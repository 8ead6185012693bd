use super::App;
use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use service_orchestration::TemplateKind;
use service_store::{ServiceRecord, ServiceStatus};
use std::process::ExitCode;

pub async fn run(app: &App, all: bool) -> Result<ExitCode> {
    let store = app.store().await?;
    let records = store.list(all).await?;

    if records.is_empty() {
        println!("No services");
    } else {
        println!("{}", services_table(&records));
    }
    Ok(ExitCode::SUCCESS)
}

fn status_color(status: ServiceStatus) -> Color {
    match status {
        ServiceStatus::Creating => Color::Yellow,
        ServiceStatus::Active => Color::Green,
        ServiceStatus::Inactive => Color::DarkGrey,
        ServiceStatus::Failed => Color::Red,
        ServiceStatus::Deleted => Color::DarkGrey,
    }
}

fn services_table(records: &[ServiceRecord]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["ID", "NAME", "TEMPLATE", "NAMESPACE", "STATUS", "CREATED"]);

    for record in records {
        table.add_row(vec![
            Cell::new(&record.id),
            Cell::new(&record.display_name),
            Cell::new(&record.template),
            Cell::new(&record.namespace),
            Cell::new(record.status).fg(status_color(record.status)),
            Cell::new(record.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    table
}

pub fn templates() -> Result<ExitCode> {
    let mut table = Table::new();
    table.set_header(vec!["TEMPLATE", "DESCRIPTION"]);
    for kind in TemplateKind::ALL {
        table.add_row(vec![kind.id(), kind.description()]);
    }
    println!("{table}");
    Ok(ExitCode::SUCCESS)
}
