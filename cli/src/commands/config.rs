// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use marshal_core::domain::node_config::NodeConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path (default: ./marshal-config.yaml)
        #[arg(short, long, default_value = "./marshal-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(&output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. MARSHAL_CONFIG_PATH: {}",
            std::env::var("MARSHAL_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./marshal-config.yaml");
        println!("  4. ~/.marshal/config.yaml");
        println!("  5. /etc/marshal/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let docker = &config.spec.docker;
    println!("{}", "Docker:".bold());
    println!(
        "  Socket: {}",
        docker.socket_path.as_deref().unwrap_or("(platform default)")
    );
    println!("  Connect timeout: {}s", docker.connect_timeout_secs);
    println!();

    let orchestration = &config.spec.orchestration;
    println!("{}", "Orchestration:".bold());
    println!("  Container prefix: {}", orchestration.container_prefix);
    println!("  Driver timeout: {:?}", orchestration.driver_timeout);
    println!(
        "  Driver retry: {} attempts, {:?} - {:?}",
        orchestration.driver_retry.attempts,
        orchestration.driver_retry.initial_delay,
        orchestration.driver_retry.max_delay
    );
    println!(
        "  Restart backoff: {:?} - {:?}",
        orchestration.restart_backoff.initial_delay, orchestration.restart_backoff.max_delay
    );
    println!("  Restart backoff reset after: {:?}", orchestration.restart_reset_after);
    if let Some(base_dir) = &orchestration.base_dir {
        println!("  Base directory: {}", base_dir.display());
    }
    println!();

    let network = &config.spec.network;
    let observability = &config.spec.observability;
    println!("{}", "API:".bold());
    println!("  Listen: {}:{}", network.bind_address, network.port);
    println!(
        "  Logging: {} ({})",
        observability.logging.level, observability.logging.format
    );
    if observability.metrics.enabled {
        println!("  Metrics: port {}", observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists, use --force to overwrite", output.display());
    }

    NodeConfigManifest::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
