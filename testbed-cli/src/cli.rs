//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use testbed_core::types::{EnvName, UnitId};

/// testbed -- run ordered test units in isolated, self-healing environments.
///
/// Use `testbed <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "testbed", version, about, long_about = None)]
pub struct Cli {
    /// Path to the testbed.toml configuration file.
    #[arg(short, long, global = true, default_value = "testbed.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a unit, resolving prerequisites and rebuilding polluted environments.
    RunUnit(RunUnitArgs),

    /// Delete an environment directory (refused while a live lock is held).
    DestroyEnv(EnvTargetArgs),

    /// Show markers, locks and foundation state of an environment.
    InspectEnv(EnvTargetArgs),

    /// List declared units and environments.
    List,

    /// Inspect or rebuild the foundation cache.
    Foundation(FoundationArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- run-unit ----

#[derive(Args, Debug)]
pub struct RunUnitArgs {
    /// Unit to run.
    pub name: UnitId,

    /// Run this unit first instead of the declared prerequisite.
    #[arg(long)]
    pub prereq: Option<UnitId>,
}

// ---- destroy-env / inspect-env ----

#[derive(Args, Debug)]
pub struct EnvTargetArgs {
    /// Environment name.
    pub name: EnvName,
}

// ---- foundation ----

#[derive(Args, Debug)]
pub struct FoundationArgs {
    #[command(subcommand)]
    pub action: FoundationAction,
}

#[derive(Subcommand, Debug)]
pub enum FoundationAction {
    /// Report whether the foundation is missing, fresh or stale.
    Status,
    /// Destroy the foundation environment and re-run its bootstrap unit.
    Rebuild,
}

// ---- config ----

/// Manage testbed configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, lock, foundation, environments, units).
        #[arg(long)]
        section: Option<String>,
    },
}
