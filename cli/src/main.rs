// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Marshal CLI
//!
//! The `marshal` binary runs the orchestrator daemon and talks to it.
//!
//! ## Commands
//!
//! - `marshal serve` - Run the daemon in the foreground
//! - `marshal app create|delete|list|status|log` - Application operations
//! - `marshal config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use marshal::commands::{self, AppCommand, ConfigCommand};
use marshal::daemon;
use marshal_core::domain::node_config::NodeConfigManifest;

/// Marshal - goal orchestration for multi-container applications
#[derive(Parser)]
#[command(name = "marshal")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "MARSHAL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port of the daemon (default: from configuration, 8080)
    #[arg(long, global = true, env = "MARSHAL_PORT")]
    port: Option<u16>,

    /// HTTP API host of the daemon
    #[arg(long, global = true, env = "MARSHAL_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "MARSHAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, global = true, env = "MARSHAL_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator daemon in the foreground
    #[command(name = "serve")]
    Serve,

    /// Application operations
    #[command(name = "app")]
    App {
        #[command(subcommand)]
        command: AppCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve) => {
            let mut config = NodeConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            let logging = &config.spec.observability.logging;
            init_logging(
                cli.log_level.as_deref().unwrap_or(&logging.level),
                cli.log_format.as_deref().unwrap_or(&logging.format),
            )?;
            if let Some(port) = cli.port {
                config.spec.network.port = port;
            }
            daemon::start_daemon(config).await
        }
        Some(Commands::App { command }) => {
            init_cli_logging(&cli.log_level, &cli.log_format)?;
            let port = match cli.port {
                Some(port) => port,
                None => daemon_port(cli.config)?,
            };
            commands::app::handle_command(command, &cli.host, port).await
        }
        Some(Commands::Config { command }) => {
            init_cli_logging(&cli.log_level, &cli.log_format)?;
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Port of the configured daemon when none is given on the command line.
fn daemon_port(config: Option<PathBuf>) -> Result<u16> {
    let config = NodeConfigManifest::load_or_default(config).context("Failed to load configuration")?;
    Ok(config.spec.network.port)
}

fn init_cli_logging(level: &Option<String>, format: &Option<String>) -> Result<()> {
    init_logging(
        level.as_deref().unwrap_or("warn"),
        format.as_deref().unwrap_or("text"),
    )
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        "text" => builder.compact().init(),
        other => anyhow::bail!("Unknown log format '{}'. Use 'text' or 'json'", other),
    }

    Ok(())
}
