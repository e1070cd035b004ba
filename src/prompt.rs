//! Prompt assembly.
//!
//! The run driver asks a [`PromptAssembler`] for the text of each batch. The default
//! assembler renders a base prompt followed by both schemas, target sample rows and the
//! batch's source questions.

use crate::config::GenerationConfig;
use crate::error::ApiError;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::path::Path;

/// Everything a prompt for one batch may draw on
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub source_db_id: &'a str,
    pub source_schema: &'a Value,
    pub target_db_id: &'a str,
    pub target_schema: &'a Value,
    pub target_samples: &'a Value,
    pub questions: &'a [Value],
}

pub trait PromptAssembler: Send + Sync {
    fn assemble(&self, context: &PromptContext<'_>) -> Result<String, ApiError>;

    /// System instruction sent alongside every prompt (may be empty)
    fn system_instruction(&self) -> &str;
}

/// Prompt files loaded from the prompt directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub base: String,
    pub system_instruction: String,
}

impl PromptTemplates {
    /// Load the base prompt and, when configured, the system instruction.
    ///
    /// A missing or blank file is an error.
    pub fn load(workspace_root: &Path, config: &GenerationConfig) -> Result<Self, ApiError> {
        let dir = workspace_root.join(&config.prompt_directory);
        let base = read_prompt_file(&dir.join(&config.base_prompt_file))?;
        let system_instruction = match &config.system_instruction_file {
            Some(file) => read_prompt_file(&dir.join(file))?,
            None => String::new(),
        };
        Ok(Self {
            base,
            system_instruction,
        })
    }
}

fn read_prompt_file(path: &Path) -> Result<String, ApiError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ApiError::PromptError(format!("Failed to read prompt file {}: {}", path.display(), e))
    })?;
    if text.trim().is_empty() {
        return Err(ApiError::PromptError(format!(
            "Prompt file is empty: {}",
            path.display()
        )));
    }
    Ok(text)
}

fn to_json_indent4<T: Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value
        .serialize(&mut serializer)
        .map_err(|e| ApiError::PromptError(format!("Failed to render prompt JSON: {}", e)))?;
    String::from_utf8(buf)
        .map_err(|e| ApiError::PromptError(format!("Prompt JSON is not UTF-8: {}", e)))
}

/// Schemas are usually stored as one DDL string; anything else is rendered as JSON.
fn schema_text(schema: &Value) -> String {
    match schema {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn schema_block(heading: &str, db_id: &str, schema: &Value) -> Result<String, ApiError> {
    let block = serde_json::json!({ "db_id": db_id, "schema": schema_text(schema) });
    Ok(format!("# {}\n{}\n\n", heading, to_json_indent4(&block)?))
}

pub struct TemplatePromptAssembler {
    templates: PromptTemplates,
}

impl TemplatePromptAssembler {
    pub fn new(templates: PromptTemplates) -> Self {
        Self { templates }
    }
}

impl PromptAssembler for TemplatePromptAssembler {
    fn assemble(&self, context: &PromptContext<'_>) -> Result<String, ApiError> {
        let mut prompt = String::with_capacity(self.templates.base.len() + 4096);
        prompt.push_str(&self.templates.base);
        prompt.push_str("\n\n## Generate the query for the following query:\n\n");
        prompt.push_str(&schema_block(
            "Source schema",
            context.source_db_id,
            context.source_schema,
        )?);
        prompt.push_str(&schema_block(
            "Target schema",
            context.target_db_id,
            context.target_schema,
        )?);
        prompt.push_str("# Target sample data\n");
        prompt.push_str(&to_json_indent4(context.target_samples)?);
        prompt.push_str("\n\n# Source query:\n");
        prompt.push_str(&to_json_indent4(context.questions)?);
        prompt.push_str("\n\n#Output:\n\n");
        Ok(prompt)
    }

    fn system_instruction(&self) -> &str {
        &self.templates.system_instruction
    }
}
