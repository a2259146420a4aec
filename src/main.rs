use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use presence_hall::metrics::TelemetryFormat;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::ConfigOverrides;

#[derive(Parser)]
#[command(name = "presence-hall")]
#[command(version, about = "Shared presence registry with heartbeats and expiry", long_about = None)]
struct Cli {
    /// Config file (default: ~/.presence-hall/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Registry name; selects the table inside the database
    #[arg(long, global = true)]
    registry: Option<String>,
    /// Heartbeat interval, e.g. 5s, 500ms, 1m
    #[arg(long, global = true, value_parser = cli::parse_duration)]
    heartbeat: Option<Duration>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a name and keep it alive until Ctrl+C
    Register {
        name: String,
        /// Payload stored with the entry
        #[arg(long, default_value = "")]
        content: String,
    },
    /// Delete a name if it is alive
    Unregister { name: String },
    /// Print alive or dead; exit status 1 when dead
    Alive { name: String },
    /// List entries
    List {
        /// Only alive entries
        #[arg(long)]
        alive: bool,
        #[arg(long)]
        json: bool,
    },
    /// Collect expired entries
    Gc {
        /// Keep collecting every heartbeat interval until Ctrl+C
        #[arg(long)]
        watch: bool,
    },
    /// Print counters after one GC sweep
    Stats {
        /// prometheus or json
        #[arg(long, default_value = "prometheus")]
        format: TelemetryFormat,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = cli::load_config(ConfigOverrides {
        config: cli.config,
        db: cli.db,
        registry: cli.registry,
        heartbeat: cli.heartbeat,
    })?;

    match cli.command {
        Commands::Register { name, content } => cli::cmd_register(config, name, content).await?,
        Commands::Unregister { name } => cli::cmd_unregister(config, name).await?,
        Commands::Alive { name } => return cli::cmd_alive(config, name).await,
        Commands::List { alive, json } => cli::cmd_list(config, alive, json).await?,
        Commands::Gc { watch } => cli::cmd_gc(config, watch).await?,
        Commands::Stats { format } => cli::cmd_stats(config, format).await?,
    }

    Ok(ExitCode::SUCCESS)
}
