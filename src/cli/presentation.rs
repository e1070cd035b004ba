//! CLI presentation: text and json formatters per command.

mod run;
mod shared;
mod tools;

pub use run::{format_run_summary_json, format_run_summary_text};
pub use shared::format_section_heading;
pub use tools::{
    format_config_check_json, format_config_check_text, format_models_json, format_models_text,
    format_repair_json, format_repair_text, format_token_report,
};
