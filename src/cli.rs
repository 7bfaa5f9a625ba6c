//! CLI argument parsing for Causeway

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "causeway")]
#[command(version)]
#[command(
    about = "Reconstruct causal paths from trace logs and check them against expectations",
    long_about = None
)]
pub struct Cli {
    /// Trace logs to reconcile (JSON lines, one log per traced thread)
    #[arg(required = true, value_name = "LOG")]
    pub logs: Vec<PathBuf>,

    /// Expectation file (.json or .toml); may be repeated
    #[arg(short = 'e', long = "expect", value_name = "FILE")]
    pub expectations: Vec<PathBuf>,

    /// Configuration file (default: ./causeway.toml when present)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Keep sends that were never received as one-sided messages
    #[arg(long = "save-unmatched-sends")]
    pub save_unmatched_sends: bool,

    /// Match states one recognizer check may explore (0 for no bound)
    #[arg(long = "search-budget", value_name = "STEPS")]
    pub search_budget: Option<u64>,

    /// Worker threads used for matching
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Group valid paths by structural shape
    #[arg(long = "unique")]
    pub unique: bool,

    /// Write one recognizer per unique path shape to FILE (.json or .toml)
    #[arg(long = "synthesize", value_name = "FILE")]
    pub synthesize: Option<PathBuf>,

    /// Check only the path with this id (as printed in reports)
    #[arg(long = "path", value_name = "ID")]
    pub path: Option<String>,

    /// Print the reconstructed event tree of every path
    #[arg(long = "trees")]
    pub trees: bool,

    /// Print a verdict line for every path, with event trees of failing paths
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Enable debug logging on stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
