//! CLI parse: clap types for qmap. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// qmap CLI - Bulk question/query mapping with LLM providers
#[derive(Parser)]
#[command(name = "qmap")]
#[command(about = "Generate source-to-target question/query mappings with an LLM")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, short)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every configured pipeline
    Run {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Load and validate the configuration
    CheckConfig {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List the models the configured provider offers
    Models {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Run the JSON repair engine on a saved response
    Repair {
        /// File containing a raw model response
        file: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Count the tokens of a prompt file against the model's input limit
    Tokens {
        /// Prompt file to measure
        file: PathBuf,
    },
}
