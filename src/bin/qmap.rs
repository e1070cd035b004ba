//! qmap CLI Binary
//!
//! Command-line interface for bulk question/query mapping generation.

use anyhow::Context;
use clap::Parser;
use qmap::cli::{map_error, Cli, CommandOutput, RunContext};
use qmap::config::ConfigLoader;
use qmap::error::ApiError;
use qmap::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("qmap CLI starting");

    match run(&cli) {
        Ok(output) => {
            println!("{}", output.text);
            if !output.success {
                error!("Command finished unsuccessfully");
                process::exit(1);
            }
            info!("Command completed successfully");
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            match e.downcast_ref::<ApiError>() {
                Some(api) => eprintln!("{}", map_error(api)),
                None => eprintln!("{:#}", e),
            }
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<CommandOutput> {
    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())
        .with_context(|| format!("loading configuration for {}", cli.workspace.display()))?;
    info!("CLI context initialized");
    Ok(context.execute(&cli.command)?)
}

/// Build logging configuration from CLI args and config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = if let Some(ref config_path) = cli.config {
        ConfigLoader::load_from_file(config_path)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    } else {
        ConfigLoader::load(&cli.workspace)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    };

    if cli.quiet {
        config.enabled = false;
    }
    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }

    if config.enabled && config.output == "file" {
        let resolved = qmap::logging::resolve_log_file_path(
            cli.log_file.clone(),
            config.file.clone(),
            Some(cli.workspace.as_path()),
        );
        if let Ok(path) = resolved {
            config.file = Some(path);
        }
    } else if let Some(ref file) = cli.log_file {
        config.file = Some(file.clone());
    }

    config
}
