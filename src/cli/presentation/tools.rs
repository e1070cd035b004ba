//! Presentation for check-config, models, repair and tokens.

use super::shared::{format_section_heading, new_table, to_pretty_json};
use crate::config::{QmapConfig, ValidationError};
use crate::error::ApiError;
use crate::generation::{ErrorSet, Repaired};
use serde_json::json;

pub fn format_config_check_text(config: &QmapConfig, problems: &[ValidationError]) -> String {
    let mut out = String::new();
    if !problems.is_empty() {
        out.push_str(&format!(
            "{}\n\n",
            format_section_heading("Configuration problems")
        ));
        for problem in problems {
            out.push_str(&format!("  - {}\n", problem));
        }
        return out;
    }

    out.push_str(&format!("{}\n\n", format_section_heading("Configuration")));
    out.push_str(&format!(
        "  Model: {} ({})\n",
        config.model.model,
        config.model.origin.as_str()
    ));
    let generation = &config.generation;
    out.push_str(&format!(
        "  Attempts per prompt: {}\n  Fail limit: {}\n  Questions per prompt: {}\n\n",
        generation.max_attempts_per_prompt,
        generation.max_fail_limit,
        generation.max_questions_per_prompt
    ));

    let mut table = new_table(vec!["#", "Pipeline", "Source dataset", "Source dbs"]);
    for (index, pipeline) in config.pipelines.iter().enumerate() {
        let sources = if pipeline.source_db_ids.is_empty() {
            "all".to_string()
        } else {
            pipeline.source_db_ids.join(", ")
        };
        table.add_row(vec![
            (index + 1).to_string(),
            pipeline.name(),
            pipeline.source_dataset.display().to_string(),
            sources,
        ]);
    }
    out.push_str(&format!("{}\n", table));
    out
}

pub fn format_config_check_json(
    config: &QmapConfig,
    problems: &[ValidationError],
) -> Result<String, ApiError> {
    let problems: Vec<String> = problems.iter().map(ToString::to_string).collect();
    to_pretty_json(&json!({
        "valid": problems.is_empty(),
        "problems": problems,
        "config": config.redacted(),
    }))
}

pub fn format_models_text(models: &[String], configured: &str) -> String {
    if models.is_empty() {
        return "No models available.".to_string();
    }
    let mut out = format!("{}\n\n", format_section_heading("Available models"));
    for model in models {
        let marker = if model == configured { "*" } else { " " };
        out.push_str(&format!("  {} {}\n", marker, model));
    }
    out.push_str(&format!("\nTotal: {} model(s)\n", models.len()));
    out
}

pub fn format_models_json(models: &[String], configured: &str) -> Result<String, ApiError> {
    to_pretty_json(&json!({
        "models": models,
        "configured": configured,
        "configured_available": models.iter().any(|m| m == configured),
    }))
}

pub fn format_repair_text(repaired: Option<&Repaired>, errors: &ErrorSet) -> String {
    match repaired {
        Some(repaired) => format!(
            "Parsed {} record(s){}",
            repaired.records.len(),
            if repaired.fixed {
                " after inserting missing commas"
            } else {
                ", no repair needed"
            }
        ),
        None => {
            let kinds: Vec<&str> = errors.active().iter().map(|k| k.as_str()).collect();
            format!("Could not parse response: {}", kinds.join(", "))
        }
    }
}

pub fn format_repair_json(
    repaired: Option<&Repaired>,
    errors: &ErrorSet,
) -> Result<String, ApiError> {
    to_pretty_json(&json!({
        "parsed": repaired.is_some(),
        "fixed": repaired.map(|r| r.fixed),
        "errors": errors,
        "records": repaired.map(|r| &r.records),
    }))
}

pub fn format_token_report(tokens: u64, limit: Option<u64>) -> String {
    match limit {
        Some(limit) if limit > 0 => format!(
            "Tokens: {} / {} ({:.1}% of the input limit)",
            tokens,
            limit,
            tokens as f64 / limit as f64 * 100.0
        ),
        _ => format!("Tokens: {}", tokens),
    }
}
