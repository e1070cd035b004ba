//! One source-to-target mapping.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Dataset directory with `schemas.json` and `questions/`
    pub source_dataset: PathBuf,

    /// Dataset directory with `schemas.json` and `target_samples/`
    pub target_dataset: PathBuf,

    /// Restrict to these source databases; empty means all
    #[serde(default)]
    pub source_db_ids: Vec<String>,

    pub target_db_id: String,

    /// -1 keeps file order, 0 shuffles with a time seed, any other value is the seed
    #[serde(default = "default_keep")]
    pub source_questions_shuffle_seed: i64,

    /// -1 keeps all questions, 0 skips the source, n keeps the first n
    #[serde(default = "default_keep")]
    pub source_questions_limit: i64,
}

fn default_keep() -> i64 {
    -1
}

impl PipelineConfig {
    /// `<target dataset dir name>_<target db id>`, used to name pipeline output.
    pub fn name(&self) -> String {
        format!("{}_{}", self.target_dataset_name(), self.target_db_id)
    }

    pub fn target_dataset_name(&self) -> String {
        self.target_dataset
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.target_dataset.to_string_lossy().to_string())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.target_db_id.trim().is_empty() {
            return Err("target_db_id cannot be empty".to_string());
        }
        if self.source_dataset.as_os_str().is_empty() {
            return Err("source_dataset cannot be empty".to_string());
        }
        if self.target_dataset.as_os_str().is_empty() {
            return Err("target_dataset cannot be empty".to_string());
        }
        if self.source_questions_limit < -1 {
            return Err("source_questions_limit must be -1, 0 or positive".to_string());
        }
        Ok(())
    }
}
