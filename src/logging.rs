//! Logging System
//!
//! Structured logging using the `tracing` crate. Progress of a generation run,
//! per-attempt failure reasons and abort notices all go through here.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Master switch; `--quiet` turns it off
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path (if output is "file"). Resolved at startup when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable colored output (text format only, stdout/stderr only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            color: true,
            modules: HashMap::new(),
        }
    }
}

/// Resolve the log file path.
///
/// Priority: explicit CLI path, then configured path (relative paths are joined to the
/// workspace root), then `$XDG_DATA_HOME/qmap/qmap.log`.
pub fn resolve_log_file_path(
    cli_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
    workspace_root: Option<&Path>,
) -> Result<PathBuf, ApiError> {
    if let Some(path) = cli_file {
        return Ok(path);
    }
    if let Some(path) = config_file {
        if path.is_relative() {
            if let Some(root) = workspace_root {
                return Ok(root.join(path));
            }
        }
        return Ok(path);
    }
    directories::ProjectDirs::from("", "", "qmap")
        .map(|dirs| dirs.data_dir().join("qmap.log"))
        .ok_or_else(|| {
            ApiError::ConfigError("Could not determine a data directory for the log file".to_string())
        })
}

/// Initialize the logging system
///
/// Priority order (highest to lowest):
/// 1. Environment variables (QMAP_LOG, QMAP_LOG_FORMAT, QMAP_LOG_OUTPUT)
/// 2. Configuration (already merged with CLI flags by the binary)
/// 3. Defaults
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ApiError> {
    if config.map(|c| !c.enabled).unwrap_or(false) {
        return Ok(());
    }

    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;
    let use_color = config.map(|c| c.color).unwrap_or(true);

    let base_subscriber = Registry::default().with(filter);

    let open_log_file = || -> Result<std::fs::File, ApiError> {
        let log_file = resolve_log_file_path(None, config.and_then(|c| c.file.clone()), None)?;
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ApiError::ConfigError(format!("Failed to create log directory: {}", e))
            })?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(|e| {
                ApiError::ConfigError(format!("Failed to open log file {:?}: {}", log_file, e))
            })
    };

    let timer = ChronoUtc::rfc_3339();
    match (format.as_str(), output) {
        ("json", OutputDestination::File) => base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(timer)
                    .with_writer(open_log_file()?),
            )
            .try_init(),
        ("json", OutputDestination::Stderr) => base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(timer)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        ("json", OutputDestination::Stdout) => base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(timer)
                    .with_writer(std::io::stdout),
            )
            .try_init(),
        (_, OutputDestination::File) => base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(timer)
                    .with_ansi(false)
                    .with_writer(open_log_file()?),
            )
            .try_init(),
        (_, OutputDestination::Stderr) => base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(timer)
                    .with_ansi(use_color)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        (_, OutputDestination::Stdout) => base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(timer)
                    .with_ansi(use_color)
                    .with_writer(std::io::stdout),
            )
            .try_init(),
    }
    .map_err(|e| ApiError::ConfigError(format!("Failed to install log subscriber: {}", e)))
}

/// Build environment filter from config or environment variables
fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, ApiError> {
    if let Ok(filter) = EnvFilter::try_from_env("QMAP_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    if level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(level);
    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            let directive = format!("{}={}", module, module_level);
            filter = filter.add_directive(
                directive
                    .parse()
                    .map_err(|e| ApiError::ConfigError(format!("Invalid log directive: {}", e)))?,
            );
        }
    }

    Ok(filter)
}

/// Determine output format from config or environment
fn determine_format(config: Option<&LoggingConfig>) -> Result<String, ApiError> {
    if let Ok(format) = std::env::var("QMAP_LOG_FORMAT") {
        if format == "json" || format == "text" {
            return Ok(format);
        }
    }

    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    if format != "json" && format != "text" {
        return Err(ApiError::ConfigError(format!(
            "Invalid log format: {} (must be 'json' or 'text')",
            format
        )));
    }

    Ok(format.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputDestination {
    Stdout,
    Stderr,
    File,
}

fn determine_output(config: Option<&LoggingConfig>) -> Result<OutputDestination, ApiError> {
    if let Ok(output) = std::env::var("QMAP_LOG_OUTPUT") {
        return parse_output_destination(&output);
    }
    parse_output_destination(config.map(|c| c.output.as_str()).unwrap_or("stderr"))
}

fn parse_output_destination(output: &str) -> Result<OutputDestination, ApiError> {
    match output {
        "stdout" => Ok(OutputDestination::Stdout),
        "stderr" => Ok(OutputDestination::Stderr),
        "file" => Ok(OutputDestination::File),
        _ => Err(ApiError::ConfigError(format!(
            "Invalid log output: {} (must be 'stdout', 'stderr' or 'file')",
            output
        ))),
    }
}
