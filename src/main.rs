use std::path::PathBuf;

use alertflow::config::{AlertflowConfig, LogFormat};
use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;

#[derive(Parser)]
#[command(name = "alertflow")]
#[command(version, about = "Per-alert AI analysis orchestration engine")]
pub struct Cli {
    /// Path to alertflow.toml (defaults to ./alertflow.toml when present)
    #[arg(short, long, global = true, env = "ALERTFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format; overrides [logging] format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the alert API and progress WebSocket
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Analyze one alert document locally
    Run {
        /// Path to the alert JSON document
        alert: PathBuf,

        /// Run a single stage instead of the one-click pipeline
        #[arg(short, long)]
        stage: Option<String>,

        /// Alert id (defaults to the document's "id" field, then the file name)
        #[arg(long)]
        alert_id: Option<String>,

        /// Organization the alert belongs to
        #[arg(long, default_value = "local")]
        org: String,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default alertflow.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(cli.config.as_deref(), command.clone());
    }

    let config = AlertflowConfig::load(cli.config.as_deref())?;
    let mut logging = config.toml.logging.clone();
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    let _log_guard = alertflow::logging::init(&logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { host, port } => cmd::cmd_serve(config, host.clone(), *port).await?,
        Commands::Run {
            alert,
            stage,
            alert_id,
            org,
            ui,
        } => {
            cmd::cmd_run(
                config,
                cmd::RunArgs {
                    alert_file: alert,
                    stage: stage.as_deref(),
                    alert_id: alert_id.as_deref(),
                    organization: org,
                    ui,
                    verbose: cli.verbose,
                },
            )
            .await?
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
