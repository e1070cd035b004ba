//! Generation policy: retry budget, abort ceiling, batch sizing, validation and output.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which structural checks run on a parsed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationToggles {
    #[serde(default = "default_true")]
    pub fields_checking: bool,
    #[serde(default = "default_true")]
    pub db_id_matching: bool,
}

impl Default for ValidationToggles {
    fn default() -> Self {
        Self {
            fields_checking: true,
            db_id_matching: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Directory holding prompt files, relative to the workspace root
    #[serde(default = "default_prompt_directory")]
    pub prompt_directory: PathBuf,

    #[serde(default = "default_base_prompt_file")]
    pub base_prompt_file: String,

    /// Optional system instruction file inside `prompt_directory`
    #[serde(default)]
    pub system_instruction_file: Option<String>,

    /// Root for run artifacts; a `<model>/<timestamp>` directory is created below it
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Extra flat copy of accepted records only
    #[serde(default)]
    pub json_only_output_directory: Option<PathBuf>,

    #[serde(default)]
    pub copy_settings_to_output: bool,

    /// Attempts per prompt batch before it is skipped
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_prompt: usize,

    /// Run-wide unexpected failures that abort the whole run
    #[serde(default = "default_max_fail_limit")]
    pub max_fail_limit: usize,

    #[serde(default = "default_max_questions")]
    pub max_questions_per_prompt: usize,

    /// Sleep after an attempt that failed with an unexpected (transport) error
    #[serde(default = "default_backoff_secs")]
    pub retry_backoff_secs: f64,

    /// Max-token failures before the operator reminder is logged
    #[serde(default = "default_max_token_reminder")]
    pub max_token_reminder: usize,

    /// Comma insertions the repair engine may make for one response
    #[serde(default = "default_max_repair_passes")]
    pub max_repair_passes: usize,

    /// Exact key set every generated record must have
    #[serde(default = "default_fields_to_check")]
    pub fields_to_check: Vec<String>,

    #[serde(default = "default_source_id_field")]
    pub source_id_field: String,

    #[serde(default = "default_target_id_field")]
    pub target_id_field: String,

    #[serde(default)]
    pub validation: ValidationToggles,
}

fn default_true() -> bool {
    true
}

fn default_prompt_directory() -> PathBuf {
    PathBuf::from("prompts")
}

fn default_base_prompt_file() -> String {
    "base_prompt.txt".to_string()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("output")
}

fn default_max_attempts() -> usize {
    3
}

fn default_max_fail_limit() -> usize {
    5
}

fn default_max_questions() -> usize {
    10
}

fn default_backoff_secs() -> f64 {
    1.0
}

fn default_max_token_reminder() -> usize {
    9
}

fn default_max_repair_passes() -> usize {
    32
}

fn default_fields_to_check() -> Vec<String> {
    vec![
        "source_db_id".to_string(),
        "source_question".to_string(),
        "source_query".to_string(),
        "target_db_id".to_string(),
        "target_question".to_string(),
        "target_query".to_string(),
    ]
}

fn default_source_id_field() -> String {
    "source_db_id".to_string()
}

fn default_target_id_field() -> String {
    "target_db_id".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            prompt_directory: default_prompt_directory(),
            base_prompt_file: default_base_prompt_file(),
            system_instruction_file: None,
            output_directory: default_output_directory(),
            json_only_output_directory: None,
            copy_settings_to_output: false,
            max_attempts_per_prompt: default_max_attempts(),
            max_fail_limit: default_max_fail_limit(),
            max_questions_per_prompt: default_max_questions(),
            retry_backoff_secs: default_backoff_secs(),
            max_token_reminder: default_max_token_reminder(),
            max_repair_passes: default_max_repair_passes(),
            fields_to_check: default_fields_to_check(),
            source_id_field: default_source_id_field(),
            target_id_field: default_target_id_field(),
            validation: ValidationToggles::default(),
        }
    }
}

impl GenerationConfig {
    /// Saturates at [`Duration::MAX`]; `problems` rejects values that large.
    pub fn retry_backoff(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_backoff_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Every policy problem in this section, in declaration order.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_attempts_per_prompt == 0 {
            problems.push("max_attempts_per_prompt must be at least 1".to_string());
        }
        if self.max_fail_limit == 0 {
            problems.push("max_fail_limit must be at least 1".to_string());
        }
        if self.max_questions_per_prompt == 0 {
            problems.push("max_questions_per_prompt must be at least 1".to_string());
        }
        if !self.retry_backoff_secs.is_finite() || self.retry_backoff_secs < 0.0 {
            problems.push("retry_backoff_secs must be a non-negative number".to_string());
        } else if Duration::try_from_secs_f64(self.retry_backoff_secs).is_err() {
            problems.push("retry_backoff_secs is too large".to_string());
        }
        if self.max_token_reminder == 0 {
            problems.push("max_token_reminder must be at least 1".to_string());
        }
        if self.base_prompt_file.trim().is_empty() {
            problems.push("base_prompt_file cannot be empty".to_string());
        }
        if self.validation.fields_checking && self.fields_to_check.is_empty() {
            problems.push("fields_to_check cannot be empty when fields_checking is on".to_string());
        }
        if self.validation.db_id_matching
            && (self.source_id_field.is_empty() || self.target_id_field.is_empty())
        {
            problems.push("id field names cannot be empty when db_id_matching is on".to_string());
        }
        problems
    }
}
