//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::cli::output::CommandOutput;
use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_config_check_json, format_config_check_text, format_models_json, format_models_text,
    format_repair_json, format_repair_text, format_run_summary_json, format_run_summary_text,
    format_token_report,
};
use crate::config::{ConfigLoader, QmapConfig};
use crate::dataset::FsDatasetProvider;
use crate::error::ApiError;
use crate::generation::{extract_json_array, ErrorSet, GenerationRun, JsonRepairer};
use crate::prompt::{PromptTemplates, TemplatePromptAssembler};
use crate::provider::{verify_model, GenerationClient, ProviderFactory};
use crate::sink::FsOutputSink;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::info;

/// Runtime context for CLI execution: workspace root and the loaded configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config: QmapConfig,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        Ok(Self::with_config(workspace_root, config))
    }

    pub fn with_config(workspace_root: PathBuf, config: QmapConfig) -> Self {
        Self {
            workspace_root,
            config,
        }
    }

    pub fn config(&self) -> &QmapConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<CommandOutput, ApiError> {
        match command {
            Commands::Run { format } => self.handle_run(format),
            Commands::CheckConfig { format } => self.handle_check_config(format),
            Commands::Models { format } => self.handle_models(format).map(CommandOutput::ok),
            Commands::Repair { file, format } => {
                self.handle_repair(file, format).map(CommandOutput::ok)
            }
            Commands::Tokens { file } => self.handle_tokens(file).map(CommandOutput::ok),
        }
    }

    fn runtime() -> Result<Runtime, ApiError> {
        Runtime::new()
            .map_err(|e| ApiError::ProviderError(format!("Failed to create runtime: {}", e)))
    }

    fn client(&self) -> Result<Box<dyn GenerationClient>, ApiError> {
        ProviderFactory::create_client(&self.config.model)
    }

    fn ensure_valid(&self) -> Result<(), ApiError> {
        self.config.validate().map_err(|problems| {
            let list: Vec<String> = problems.iter().map(ToString::to_string).collect();
            ApiError::ConfigError(list.join("; "))
        })
    }

    fn handle_run(&self, format: &str) -> Result<CommandOutput, ApiError> {
        self.ensure_valid()?;
        if self.config.pipelines.is_empty() {
            return Err(ApiError::ConfigError(
                "No pipelines configured; add at least one [[pipelines]] entry".to_string(),
            ));
        }

        let templates = PromptTemplates::load(&self.workspace_root, &self.config.generation)?;
        let assembler = TemplatePromptAssembler::new(templates);
        let client = self.client()?;
        let datasets = FsDatasetProvider::new(&self.workspace_root);
        let rt = Self::runtime()?;

        if self.config.model.verify_model {
            rt.block_on(verify_model(client.as_ref()))?;
        }

        let mut sink = FsOutputSink::create(&self.config, &self.workspace_root)?;
        info!(
            model = client.model_name(),
            provider = client.provider_name(),
            pipelines = self.config.pipelines.len(),
            output = %sink.root().display(),
            "Starting generation run"
        );

        let summary = rt.block_on(async {
            GenerationRun::new(
                &self.config,
                client.as_ref(),
                &datasets,
                &assembler,
                &mut sink,
            )
            .execute()
            .await
        })?;

        let text = if format == "json" {
            format_run_summary_json(&summary, sink.root())?
        } else {
            format_run_summary_text(&summary, sink.root())
        };
        Ok(if summary.aborted() {
            CommandOutput::failed(text)
        } else {
            CommandOutput::ok(text)
        })
    }

    fn handle_check_config(&self, format: &str) -> Result<CommandOutput, ApiError> {
        let problems = self.config.validate().err().unwrap_or_default();
        let text = if format == "json" {
            format_config_check_json(&self.config, &problems)?
        } else {
            format_config_check_text(&self.config, &problems)
        };
        Ok(if problems.is_empty() {
            CommandOutput::ok(text)
        } else {
            CommandOutput::failed(text)
        })
    }

    fn handle_models(&self, format: &str) -> Result<String, ApiError> {
        let client = self.client()?;
        let rt = Self::runtime()?;
        let models = rt.block_on(client.list_models())?;
        if format == "json" {
            format_models_json(&models, client.model_name())
        } else {
            Ok(format_models_text(&models, client.model_name()))
        }
    }

    fn handle_repair(&self, file: &Path, format: &str) -> Result<String, ApiError> {
        let text = read_input(&self.workspace_root, file)?;
        let repairer = JsonRepairer::new(self.config.generation.max_repair_passes);
        let mut errors = ErrorSet::new();
        let repaired = repairer.repair(&mut errors, extract_json_array(&text));
        if format == "json" {
            format_repair_json(repaired.as_ref(), &errors)
        } else {
            Ok(format_repair_text(repaired.as_ref(), &errors))
        }
    }

    fn handle_tokens(&self, file: &Path) -> Result<String, ApiError> {
        let text = read_input(&self.workspace_root, file)?;
        let client = self.client()?;
        let rt = Self::runtime()?;
        let tokens = rt.block_on(client.count_tokens(&text))?;
        let limit = rt.block_on(client.token_limit()).ok();
        Ok(format_token_report(tokens, limit))
    }
}

fn read_input(workspace_root: &Path, file: &Path) -> Result<String, ApiError> {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        workspace_root.join(file)
    };
    std::fs::read_to_string(&path)
        .map_err(|e| ApiError::StorageError(crate::error::StorageError::IoError(e)))
}
