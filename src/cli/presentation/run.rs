//! Run summary presentation: text and json.

use super::shared::{format_section_heading, new_table, to_pretty_json};
use crate::error::ApiError;
use crate::generation::RunSummary;
use crate::stats::Counter;
use serde_json::json;
use std::path::Path;

pub fn format_run_summary_text(summary: &RunSummary, output_root: &Path) -> String {
    let stats = &summary.stats;
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Run summary")));

    if let (Some(origin), Some(model)) = (stats.label("model_origin"), stats.label("model_name")) {
        out.push_str(&format!("  Model: {} ({})\n", model, origin));
    }
    out.push_str(&format!("  Output: {}\n", output_root.display()));
    out.push_str(&format!(
        "  Pipelines: {} processed, {} failed to load\n",
        summary.pipelines_processed, summary.pipelines_failed
    ));
    out.push_str(&format!(
        "  Batches: {} accepted, {} skipped\n\n",
        summary.batches_accepted, summary.batches_skipped
    ));

    let mut table = new_table(vec!["Counter", "Value"]);
    for counter in [
        Counter::Request,
        Counter::Response,
        Counter::SuccessResponse,
        Counter::CorrectedResponse,
        Counter::ErrorResponse,
        Counter::UnexpectedError,
        Counter::InputToken,
        Counter::OutputToken,
    ] {
        table.add_row(vec![counter.key().to_string(), stats.count(counter).to_string()]);
    }
    table.add_row(vec![
        Counter::TimeTaken.key().to_string(),
        format!("{:.2}s", stats.seconds(Counter::TimeTaken)),
    ]);
    table.add_row(vec![
        Counter::RealTime.key().to_string(),
        format!("{:.2}s", stats.seconds(Counter::RealTime)),
    ]);
    table.add_row(vec![
        "success_rate".to_string(),
        format!("{:.1}%", stats.success_rate * 100.0),
    ]);
    table.add_row(vec![
        "correction_rate".to_string(),
        format!("{:.1}%", stats.correction_rate * 100.0),
    ]);
    out.push_str(&format!("{}\n", table));

    if let Some(reason) = &summary.abort_reason {
        out.push_str(&format!("\n{}\n  {}\n", format_section_heading("Aborted"), reason));
    }
    out
}

pub fn format_run_summary_json(
    summary: &RunSummary,
    output_root: &Path,
) -> Result<String, ApiError> {
    to_pretty_json(&json!({
        "output": output_root,
        "summary": summary,
    }))
}
