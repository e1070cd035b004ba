//! CLI domain: parse, route, output, and presentation only.
//! No domain orchestration; single route table dispatches to domain services.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::{map_error, CommandOutput};
pub use parse::{Cli, Commands};
pub use presentation::{
    format_config_check_json, format_config_check_text, format_models_json, format_models_text,
    format_repair_json, format_repair_text, format_run_summary_json, format_run_summary_text,
    format_section_heading, format_token_report,
};
pub use route::RunContext;
