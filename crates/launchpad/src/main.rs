use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

mod commands;

use commands::App;

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(about = "Launchpad - provision services onto a cluster through git-backed delivery")]
#[command(version)]
struct Cli {
    /// Settings file path (defaults to launchpad.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a service and follow its pipeline in this process
    Create {
        /// Template id (see `launchpad templates`)
        template: String,
        /// Service configuration as a JSON object
        #[arg(id = "service_config", value_name = "CONFIG")]
        config: String,
    },

    /// Create a service, running its pipeline in a worker process
    Launch {
        /// Template id
        template: String,
        /// Service configuration as a JSON object
        #[arg(id = "service_config", value_name = "CONFIG")]
        config: String,
    },

    /// Run the pipeline for a serialized record (used by `launch`)
    #[command(hide = true)]
    Worker {
        /// Service record as JSON
        #[arg(long)]
        record: String,
    },

    /// Create a legacy collector service
    CreateService {
        /// Service name
        name: String,
        /// Coin symbol
        coin: String,
        /// Collector type
        collector_type: String,
    },

    /// Remove a legacy collector service and everything it deployed
    RmService {
        /// Service name
        name: String,
        /// Coin symbol
        coin: String,
        /// Collector type
        collector_type: String,
    },

    /// Scale a service to zero and suspend reconciliation
    Pause {
        /// Service id
        id: String,
    },

    /// Scale a paused service back up and resume reconciliation
    Resume {
        /// Service id
        id: String,
    },

    /// Delete a service's cluster resources and mark it deleted
    Delete {
        /// Service id
        id: String,
    },

    /// Run the pipeline again for a failed service
    Retry {
        /// Service id
        id: String,
    },

    /// List services
    List {
        /// Include deleted services
        #[arg(short, long)]
        all: bool,
    },

    /// Show the log of a service
    Logs {
        /// Service id
        id: String,
        /// One JSON entry per line
        #[arg(long)]
        json: bool,
    },

    /// Check the cluster and the delivery repository
    Status,

    /// Delete completed image build jobs
    PruneBuilds {
        /// Age in hours after which completed jobs are deleted
        #[arg(long)]
        max_age_hours: Option<u64>,
    },

    /// List the available templates
    Templates,
}

fn init_tracing(cli: &Cli) {
    let level = match cli.command {
        Commands::Worker { .. } => Level::WARN,
        _ if cli.verbose => Level::DEBUG,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli);

    smol::block_on(async {
        let app = App::load(cli.config, cli.data_dir).await?;

        match cli.command {
            Commands::Create { template, config } => commands::create::run(&app, template, config).await,
            Commands::Launch { template, config } => commands::launch::run(&app, template, config).await,
            Commands::Worker { record } => commands::launch::worker(&app, &record).await,
            Commands::CreateService { name, coin, collector_type } => {
                commands::create::legacy(&app, &name, &coin, &collector_type).await
            }
            Commands::RmService { name, coin, collector_type } => {
                commands::lifecycle::decommission(&app, &name, &coin, &collector_type).await
            }
            Commands::Pause { id } => commands::lifecycle::pause(&app, &id).await,
            Commands::Resume { id } => commands::lifecycle::resume(&app, &id).await,
            Commands::Delete { id } => commands::lifecycle::delete(&app, &id).await,
            Commands::Retry { id } => commands::create::retry(&app, &id).await,
            Commands::List { all } => commands::list::run(&app, all).await,
            Commands::Logs { id, json } => commands::logs::run(&app, &id, json).await,
            Commands::Status => commands::status::run(&app).await,
            Commands::PruneBuilds { max_age_hours } => commands::status::prune_builds(&app, max_age_hours).await,
            Commands::Templates => commands::list::templates(),
        }
    })
}
