//! Configuration System
//!
//! Layered configuration for a generation run: model provider selection, retry and
//! validation policy, and the list of source-to-target pipelines. Loaded once per run
//! into a [`QmapConfig`] value that is passed by reference to every component.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

pub use crate::provider::{ModelConfig, ModelOrigin};

mod facade;
mod generation;
mod merge;
mod pipeline;
mod sources;

pub use facade::ConfigLoader;
pub use generation::{GenerationConfig, ValidationToggles};
pub use pipeline::PipelineConfig;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QmapConfig {
    /// Generation provider and sampling settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Retry, validation and output policy
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Source-to-target mappings, processed in order
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Model(String),
    Generation(String),
    Pipeline(usize, String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Model(msg) => write!(f, "Model: {}", msg),
            ValidationError::Generation(msg) => write!(f, "Generation: {}", msg),
            ValidationError::Pipeline(index, msg) => {
                write!(f, "Pipeline {}: {}", index + 1, msg)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl QmapConfig {
    /// Validate the entire configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.model.validate() {
            errors.push(ValidationError::Model(e));
        }

        for problem in self.generation.problems() {
            errors.push(ValidationError::Generation(problem));
        }

        for (index, pipeline) in self.pipelines.iter().enumerate() {
            if let Err(e) = pipeline.validate() {
                errors.push(ValidationError::Pipeline(index, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Copy of the configuration safe to write next to run artifacts.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.model.api_key.is_some() {
            copy.model.api_key = Some("<redacted>".to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn valid_config() -> QmapConfig {
        let mut config = QmapConfig::default();
        config.model.model = "gpt-4o-mini".to_string();
        config.pipelines.push(PipelineConfig {
            source_dataset: PathBuf::from("datasets/spider"),
            target_dataset: PathBuf::from("datasets/bird"),
            source_db_ids: vec![],
            target_db_id: "california_schools".to_string(),
            source_questions_shuffle_seed: -1,
            source_questions_limit: -1,
        });
        config
    }

    #[test]
    fn test_default_config() {
        let config = QmapConfig::default();
        assert!(config.pipelines.is_empty());
        assert_eq!(config.model.origin, ModelOrigin::OpenAI);
        assert_eq!(config.generation.max_attempts_per_prompt, 3);
    }

    #[test]
    fn test_config_validation_collects_all_errors() {
        let mut config = valid_config();
        assert!(config.validate().is_ok());

        config.model.model = String::new();
        config.generation.max_attempts_per_prompt = 0;
        config.pipelines[0].target_db_id = String::new();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], ValidationError::Model(_)));
        assert!(matches!(errors[1], ValidationError::Generation(_)));
        assert_eq!(
            errors[2].to_string(),
            "Pipeline 1: target_db_id cannot be empty"
        );
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let mut config = valid_config();
        config.model.api_key = Some("sk-secret".to_string());
        let redacted = config.redacted();
        assert_eq!(redacted.model.api_key.as_deref(), Some("<redacted>"));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-secret"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("qmap.toml");

        std::fs::write(
            &config_file,
            r#"
[model]
origin = "google"
model = "gemini-2.0-flash"
use_system_instruction = true
temperature = 0.2

[generation]
max_attempts_per_prompt = 4
max_fail_limit = 2
max_questions_per_prompt = 5
fields_to_check = ["source_db_id", "target_db_id", "source_question", "target_query"]

[generation.validation]
fields_checking = true
db_id_matching = false

[[pipelines]]
source_dataset = "datasets/spider"
target_dataset = "datasets/bird"
target_db_id = "debit_card_specializing"
source_questions_shuffle_seed = 42
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&config_file).unwrap();
        assert_eq!(config.model.origin, ModelOrigin::Google);
        assert_eq!(config.model.model, "gemini-2.0-flash");
        assert!(config.model.use_system_instruction);
        assert_eq!(config.generation.max_attempts_per_prompt, 4);
        assert_eq!(config.generation.max_fail_limit, 2);
        assert_eq!(config.generation.fields_to_check.len(), 4);
        assert!(!config.generation.validation.db_id_matching);
        assert_eq!(config.pipelines.len(), 1);
        assert_eq!(config.pipelines[0].source_questions_shuffle_seed, 42);
        assert_eq!(config.pipelines[0].source_questions_limit, -1);
        assert!(config.validate().is_ok());
    }
}
