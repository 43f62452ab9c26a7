//! modhost - policy pipeline module host for an LLM security gateway

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modhost::{
    config::{HostConfig, LogFormat},
    host::{self, ModuleHostBuilder},
    modules::BuiltinFactory,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "modhost")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Policy pipeline module host for an LLM security gateway")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MODHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format (overrides the config file)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the module host
    Serve {
        /// Host to bind to
        #[arg(long, env = "MODHOST_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, env = "MODHOST_PORT")]
        port: Option<u16>,
    },

    /// Check the configuration and every configured module without starting
    Validate,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HostConfig::default(),
    };

    init_logging(&config, cli.verbose, cli.log_format);

    match cli.command {
        Commands::Serve { host, port } => run_serve(config, host, port).await?,
        Commands::Validate => run_validate(&config).await?,
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

fn init_logging(config: &HostConfig, verbose: bool, format: Option<LogFormat>) {
    let directive = if verbose {
        "modhost=debug,tower_http=debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| directive.into());

    let registry = tracing_subscriber::registry().with(filter);
    match format.unwrap_or(config.logging.format) {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run_serve(config: HostConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut builder = ModuleHostBuilder::new().config(config);
    if let Some(host) = host {
        builder = builder.host(host);
    }
    if let Some(port) = port {
        builder = builder.port(port);
    }
    let module_host = Arc::new(builder.build()?);

    module_host.start().await?;
    tracing::info!("modhost is running. Press Ctrl+C to stop.");

    let served = module_host
        .clone()
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutting down...");
        })
        .await;

    module_host.stop().await?;
    served?;
    Ok(())
}

async fn run_validate(config: &HostConfig) -> Result<()> {
    let modules = host::dry_run(config, &BuiltinFactory).await?;
    println!("Configuration OK: {} module(s)", modules.len());
    for info in modules {
        println!("  {} ({}, v{})", info.name, info.module_type, info.version);
    }
    Ok(())
}

fn show_config(config: Option<&HostConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    println!("{}", config.to_toml()?);
    Ok(())
}
