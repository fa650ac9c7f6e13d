//! Command-line interface definition and configuration resolution
//!
//! This module handles the clap argument definitions and decides which
//! configuration source a command runs with.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use querypulse::{Config, Result};

/// Command-line interface definition for QueryPulse
#[derive(Parser, Debug)]
#[command(name = "querypulse")]
#[command(about = "Adaptive query performance layer: caching, latency sampling and SLA health")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands for the QueryPulse CLI
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective, validated configuration as TOML
    Config {
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show the rewrite rule matching a SQL statement
    Suggest {
        sql: String,
    },

    /// Drive a synthetic workload through the executor and report health
    Simulate {
        #[arg(long, default_value = "200")]
        queries: usize,
        /// Every Nth execution is slow; 0 disables slow executions
        #[arg(long, default_value = "10")]
        slow_every: usize,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, conflicts_with = "prometheus")]
        json: bool,
        #[arg(long)]
        prometheus: bool,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Config { .. } => "config",
            Commands::Suggest { .. } => "suggest",
            Commands::Simulate { .. } => "simulate",
        }
    }
}

/// A config file when given, otherwise defaults plus `QUERYPULSE_*` overrides
pub fn resolve_config(file: Option<&Path>) -> Result<Config> {
    match file {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}
