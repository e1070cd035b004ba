//! Dataset loading for one pipeline.
//!
//! A dataset directory holds `schemas.json` (db id to schema), `target_samples/` with one
//! `sample_<db id>.json` per database, and `questions/` with one JSON array per source
//! database. Every question file becomes one [`SourceUnit`].

use crate::config::PipelineConfig;
use crate::error::DatasetError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Questions of one source database
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub source_id: String,
    pub path: PathBuf,
    pub questions: Vec<Value>,
}

/// Everything the run driver needs for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineDataset {
    pub source_schemas: Map<String, Value>,
    pub target_schema: Value,
    pub target_samples: Value,
    pub units: Vec<SourceUnit>,
    /// Source units left out by the `source_db_ids` filter
    pub filtered_out: usize,
    /// Question files that were unreadable, empty or had no `db_id`
    pub invalid_files: Vec<PathBuf>,
}

pub trait DatasetProvider {
    fn load(&self, pipeline: &PipelineConfig) -> Result<PipelineDataset, DatasetError>;
}

/// Reads datasets from directories relative to the workspace root
pub struct FsDatasetProvider {
    workspace_root: PathBuf,
}

impl FsDatasetProvider {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

impl DatasetProvider for FsDatasetProvider {
    fn load(&self, pipeline: &PipelineConfig) -> Result<PipelineDataset, DatasetError> {
        let source_dir = self.resolve(&pipeline.source_dataset);
        let target_dir = self.resolve(&pipeline.target_dataset);

        let source_schemas = load_schemas(&source_dir.join("schemas.json"))?;
        let target_schemas = load_schemas(&target_dir.join("schemas.json"))?;

        let target_schema = target_schemas
            .get(&pipeline.target_db_id)
            .cloned()
            .ok_or_else(|| DatasetError::UnknownDbIds(pipeline.target_db_id.clone()))?;

        let unknown: Vec<&str> = pipeline
            .source_db_ids
            .iter()
            .filter(|id| !source_schemas.contains_key(id.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(DatasetError::UnknownDbIds(unknown.join(", ")));
        }

        let target_samples = read_json(
            &target_dir
                .join("target_samples")
                .join(format!("sample_{}.json", pipeline.target_db_id)),
        )?;

        let question_files = list_question_files(&source_dir.join("questions"))?;

        let mut units = Vec::new();
        let mut filtered_out = 0;
        let mut invalid_files = Vec::new();
        for path in question_files {
            let Some(questions) = prepare_questions(&path, pipeline) else {
                invalid_files.push(path);
                continue;
            };
            if questions.is_empty() {
                debug!(path = %path.display(), "Question limit is 0, skipping source");
                continue;
            }
            let Some(source_id) = questions[0].get("db_id").and_then(Value::as_str) else {
                warn!(path = %path.display(), "First question has no db_id, skipping");
                invalid_files.push(path);
                continue;
            };
            let source_id = source_id.to_string();

            if !pipeline.source_db_ids.is_empty() && !pipeline.source_db_ids.contains(&source_id) {
                filtered_out += 1;
                continue;
            }
            if !source_schemas.contains_key(&source_id) {
                warn!(source = %source_id, path = %path.display(), "No schema for source database, skipping");
                invalid_files.push(path);
                continue;
            }

            units.push(SourceUnit {
                source_id,
                path,
                questions,
            });
        }

        Ok(PipelineDataset {
            source_schemas,
            target_schema,
            target_samples,
            units,
            filtered_out,
            invalid_files,
        })
    }
}

fn read_json(path: &Path) -> Result<Value, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| DatasetError::InvalidJson {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn load_schemas(path: &Path) -> Result<Map<String, Value>, DatasetError> {
    match read_json(path)? {
        Value::Object(map) if !map.is_empty() => Ok(map),
        Value::Object(_) | Value::String(_) | Value::Null => {
            Err(DatasetError::Empty(path.to_path_buf()))
        }
        _ => Err(DatasetError::InvalidJson {
            path: path.to_path_buf(),
            message: "expected an object of db_id to schema".to_string(),
        }),
    }
}

/// `*.json` files directly inside `dir`, sorted by name
fn list_question_files(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    if !dir.is_dir() {
        return Err(DatasetError::NotFound(dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(DatasetError::Empty(dir.to_path_buf()));
    }
    Ok(files)
}

/// Read one question file and apply the pipeline's shuffle and limit.
///
/// Returns `None` for unreadable or empty files. A limit of 0 yields an empty list.
fn prepare_questions(path: &Path, pipeline: &PipelineConfig) -> Option<Vec<Value>> {
    let mut questions = match read_json(path) {
        Ok(Value::Array(questions)) if !questions.is_empty() => questions,
        Ok(_) => {
            warn!(path = %path.display(), "Question file is not a non-empty array, skipping");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Question file is not valid, skipping");
            return None;
        }
    };

    shuffle_questions(&mut questions, pipeline.source_questions_shuffle_seed);
    apply_limit(&mut questions, pipeline.source_questions_limit);
    Some(questions)
}

/// -1 keeps order, 0 seeds from the clock, any other value is the seed.
pub fn shuffle_questions(questions: &mut [Value], seed: i64) {
    let seed = match seed {
        -1 => return,
        0 => chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default() as u64,
        n => n as u64,
    };
    let mut rng = StdRng::seed_from_u64(seed);
    questions.shuffle(&mut rng);
}

/// -1 keeps everything, 0 keeps nothing, n keeps the first n.
pub fn apply_limit(questions: &mut Vec<Value>, limit: i64) {
    if limit >= 0 {
        questions.truncate(limit as usize);
    }
}
