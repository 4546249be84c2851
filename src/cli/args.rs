//! CLI argument definitions
//!
//! All Clap derive structs for `capsule-arena` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Battle orchestration and capsule evolution service.
#[derive(Parser, Debug)]
#[command(name = "capsule-arena", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "ARENA_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "ARENA_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service.
    Serve(ServeArgs),

    /// Inspect configuration.
    Config(ConfigCommand),

    /// Display version information.
    Version(VersionArgs),
}

// ============================================================================
// Serve Command
// ============================================================================

/// Arguments for `serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to YAML configuration file.
    #[arg(short, long, env = "ARENA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, e.g. `0.0.0.0:8000`.
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory holding run records.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Keep run records in memory only.
    #[arg(long, conflicts_with = "data_dir")]
    pub memory_store: bool,

    /// Do not install the Prometheus recorder.
    #[arg(long)]
    pub no_metrics: bool,
}

// ============================================================================
// Config Command
// ============================================================================

/// Configuration commands.
#[derive(Args, Debug)]
pub struct ConfigCommand {
    /// Config subcommand.
    #[command(subcommand)]
    pub subcommand: ConfigSubcommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Load and validate a configuration without starting the service.
    Check(ConfigCheckArgs),
}

/// Arguments for `config check`.
#[derive(Args, Debug)]
pub struct ConfigCheckArgs {
    /// Path to YAML configuration file. Defaults are checked when omitted.
    #[arg(short, long, env = "ARENA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the effective configuration as YAML.
    #[arg(long)]
    pub print: bool,
}

// ============================================================================
// Version Command
// ============================================================================

/// Arguments for `version`.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Shared Enums
// ============================================================================

/// Color output mode.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for informational commands.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}
