//! K2K CLI - Kafka to Kafka record pipeline.

use anyhow::Result;
use clap::{Parser, Subcommand};
use k2k_core::config::LogFormat;
use k2k_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success, including shutdown on SIGINT/SIGTERM
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, bad override)
    ConfigError = 1,
    /// Kafka-related error (connection, consumer, producer)
    KafkaError = 2,
    /// Schema could not be fetched or parsed
    SchemaError = 3,
    /// Payload rejected by the `check` command
    RecordRejected = 4,
    /// Health check failure
    HealthCheckError = 6,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code by its type.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<k2k_core::Error>() {
            return match core {
                k2k_core::Error::Config(_) => ExitCode::ConfigError,
                k2k_core::Error::Kafka(_) => ExitCode::KafkaError,
                k2k_core::Error::Schema(_) => ExitCode::SchemaError,
                _ => ExitCode::RuntimeError,
            };
        }

        if error.downcast_ref::<commands::check::Rejected>().is_some() {
            return ExitCode::RecordRejected;
        }
        if error.downcast_ref::<commands::status::Unhealthy>().is_some() {
            return ExitCode::HealthCheckError;
        }

        ExitCode::RuntimeError
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "k2k")]
#[command(about = "Validate, repair and route Kafka records", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the record pipeline
    Run {
        #[command(flatten)]
        overrides: commands::run::Overrides,
    },

    /// Fetch and print the schema the pipeline would use
    Schema,

    /// Run one JSON payload through the pipeline stages without Kafka
    Check {
        /// File holding the payload; reads stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,

        /// Local Avro schema file instead of the configured provider
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Show status and health of a running instance
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL
        #[arg(long, default_value = "http://localhost:9090")]
        metrics_url: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log settings come from the config file when it parses; JSON at info otherwise.
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| Config::from_file(path).ok())
        .map(|config| config.monitoring)
        .unwrap_or_default();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(monitoring.log_level.as_str()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { overrides } => {
            let config = load_config(cli.config.as_deref())?;
            commands::run::run(config, overrides).await?;
        }

        Commands::Schema => {
            let config = load_config(cli.config.as_deref())?;
            commands::schema::run(&config).await?;
        }

        Commands::Check { input, schema } => {
            let config = load_config(cli.config.as_deref())?;
            commands::check::run(&config, input.as_deref(), schema.as_deref()).await?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, &metrics_url).await?;
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// Load the config file, or defaults when no path is given and `k2k.toml` is absent.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from("k2k.toml");
            if !default.exists() {
                return Ok(Config::default());
            }
            default
        }
    };

    Ok(Config::from_file(&path)?)
}
