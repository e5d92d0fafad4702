// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application commands
//!
//! Commands: create, delete, list, status, log

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use marshal_core::application::ApplicationStatus;
use marshal_core::domain::application::ApplicationConfiguration;
use marshal_core::domain::goal::GoalState;

use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum AppCommand {
    /// Create an application from a JSON or YAML document
    Create {
        #[arg(value_name = "NAME")]
        name: String,

        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Stop and remove an application
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List applications
    List,

    /// Show the status of every goal
    Status {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Show a goal's output tail
    Log {
        #[arg(value_name = "NAME")]
        name: String,

        #[arg(value_name = "GOAL")]
        goal: String,

        /// Print the transition log instead of the output
        #[arg(long)]
        transitions: bool,
    },
}

pub async fn handle_command(command: AppCommand, host: &str, port: u16) -> Result<()> {
    let client = DaemonClient::new(host, port)?;
    client
        .ping()
        .await
        .with_context(|| format!("No Marshal daemon on {}:{}", host, port))?;

    match command {
        AppCommand::Create { name, file } => create(&client, &name, file).await,
        AppCommand::Delete { name } => delete(&client, &name).await,
        AppCommand::List => list(&client).await,
        AppCommand::Status { name } => status(&client, &name).await,
        AppCommand::Log {
            name,
            goal,
            transitions,
        } => log(&client, &name, &goal, transitions).await,
    }
}

async fn create(client: &DaemonClient, name: &str, file: PathBuf) -> Result<()> {
    let configuration = ApplicationConfiguration::from_file(&file)
        .with_context(|| format!("Failed to read application document {:?}", file))?;
    configuration
        .validate()
        .context("Application document is invalid")?;

    println!("Creating application: {}", name.bold());
    let status = client.create_application(name, &configuration).await?;
    println!("{}", format!("✓ Application {} created", name).green());
    print_status(&status);
    Ok(())
}

async fn delete(client: &DaemonClient, name: &str) -> Result<()> {
    println!("Deleting application: {}", name.bold());
    client.delete_application(name).await?;
    println!("{}", format!("✓ Application {} deleted", name).green());
    Ok(())
}

async fn list(client: &DaemonClient) -> Result<()> {
    let names = client.list_applications().await?;
    if names.is_empty() {
        println!("{}", "No applications found".yellow());
        return Ok(());
    }

    println!("{} applications:", names.len());
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}

async fn status(client: &DaemonClient, name: &str) -> Result<()> {
    let status = client.application_status(name).await?;
    print_status(&status);
    Ok(())
}

async fn log(client: &DaemonClient, name: &str, goal: &str, transitions: bool) -> Result<()> {
    if transitions {
        for record in client.transition_log(name, goal).await? {
            println!("  {}  {}", record.time.to_rfc3339(), format_state(record.status));
        }
    } else {
        print!("{}", client.goal_logs(name, goal).await?);
    }
    Ok(())
}

fn print_status(status: &ApplicationStatus) {
    println!("Application {}", status.name.bold());
    for (name, goal) in &status.goals {
        let main = if *name == status.main_goal { " (main)" } else { "" };
        match goal.exit_code {
            Some(code) => println!("  {}{} - {} (exit code {})", name, main, format_state(goal.status), code),
            None => println!("  {}{} - {}", name, main, format_state(goal.status)),
        }
    }
}

fn format_state(state: GoalState) -> colored::ColoredString {
    match state {
        GoalState::Running => state.as_str().green(),
        GoalState::Terminated => state.as_str().blue(),
        GoalState::Failed => state.as_str().red(),
        GoalState::WaitingForDependencies | GoalState::FetchingImage | GoalState::Starting => {
            state.as_str().yellow()
        }
    }
}
