//! Command-line interface of the runner

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::adapter::storage::CheckpointBackend;

/// Main CLI application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct RunnerCli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config:  Option<PathBuf>,
    /// Override the configured checkpoint backend
    #[arg(long, global = true)]
    pub backend: Option<CheckpointBackend>,
    /// Subcommands
    #[command(subcommand)]
    pub command: RunnerCommand
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum RunnerCommand {
    /// Run the jobs of a YAML or JSON file against the simulated environment
    Run {
        /// Path to the jobs file
        #[arg(long)]
        jobs: PathBuf
    },
    /// Resume the jobs left by an interrupted run
    Resume,
    /// Checkpoint management commands
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands
    }
}

/// Checkpoint management subcommands
#[derive(Subcommand, Debug)]
pub enum CheckpointCommands {
    /// Show the pending checkpoint
    Show,
    /// Delete the pending checkpoint
    Clear
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = RunnerCli::parse_from(["saga-runner", "run", "--jobs", "jobs.yaml", "--backend", "inmemory"]);
        assert!(matches!(cli.command, RunnerCommand::Run { ref jobs } if jobs == &PathBuf::from("jobs.yaml")));
        assert_eq!(cli.backend, Some(CheckpointBackend::InMemory));
    }

    #[test]
    fn test_parse_checkpoint_clear() {
        let cli = RunnerCli::parse_from(["saga-runner", "--config", "/tmp/c.yaml", "checkpoint", "clear"]);
        assert!(matches!(cli.command, RunnerCommand::Checkpoint { command: CheckpointCommands::Clear }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
    }
}
