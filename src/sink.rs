//! Output sink: where accepted records, transcripts and ledger snapshots go.
//!
//! [`FsOutputSink`] lays a run out as
//! `<output>/<model>/<timestamp>/<pipeline>/{<source>.json, full/, report/}` plus a
//! run-level `stats.json`. [`MemorySink`] keeps everything in memory.

use crate::config::{PipelineConfig, QmapConfig};
use crate::error::StorageError;
use crate::generation::batch::AttemptTranscript;
use crate::generation::repair::Record;
use crate::stats::{LedgerSnapshot, SkippedPrompt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait OutputSink {
    /// Replace the accepted records of one source unit
    fn write_records(
        &mut self,
        pipeline: &PipelineConfig,
        source_id: &str,
        records: &[Record],
    ) -> Result<(), StorageError>;

    /// Append the raw response of one attempt
    fn write_transcript(
        &mut self,
        pipeline: &PipelineConfig,
        transcript: &AttemptTranscript,
    ) -> Result<(), StorageError>;

    fn write_source_stats(
        &mut self,
        pipeline: &PipelineConfig,
        source_id: &str,
        snapshot: &LedgerSnapshot,
    ) -> Result<(), StorageError>;

    /// Pipeline totals plus the skip audit
    fn write_pipeline_stats(
        &mut self,
        pipeline: &PipelineConfig,
        snapshot: &LedgerSnapshot,
        skipped: &[SkippedPrompt],
    ) -> Result<(), StorageError>;

    fn write_run_stats(&mut self, snapshot: &LedgerSnapshot) -> Result<(), StorageError>;
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)?;
    Ok(())
}

/// Model names may contain `/` (e.g. `models/gemini-pro`); keep them to one path segment.
fn path_segment(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

fn divider(title: &str, width: usize, fill: char) -> String {
    let label = format!(" {} ", title);
    let side = width.saturating_sub(label.len()) / 2;
    let bar: String = std::iter::repeat(fill).take(side).collect();
    format!("{}{}{}", bar, label, bar)
}

pub struct FsOutputSink {
    root: PathBuf,
    json_only_root: Option<PathBuf>,
    model: String,
    per_source: BTreeMap<String, BTreeMap<String, LedgerSnapshot>>,
}

impl FsOutputSink {
    /// Create `<output>/<model>/<timestamp>` under the workspace and, when enabled,
    /// write a redacted copy of the configuration next to it.
    pub fn create(config: &QmapConfig, workspace_root: &Path) -> Result<Self, StorageError> {
        let model = path_segment(&config.model.model);
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let root = workspace_root
            .join(&config.generation.output_directory)
            .join(&model)
            .join(timestamp);
        fs::create_dir_all(&root)?;

        if config.generation.copy_settings_to_output {
            let settings = toml::to_string_pretty(&config.redacted())?;
            fs::write(root.join("settings.toml"), settings)?;
        }

        let json_only_root = config
            .generation
            .json_only_output_directory
            .as_ref()
            .map(|dir| workspace_root.join(dir));

        debug!(root = %root.display(), "Output directory created");
        Ok(Self::at(root, json_only_root, model))
    }

    /// Use an existing directory as the run root
    pub fn at(root: PathBuf, json_only_root: Option<PathBuf>, model: String) -> Self {
        Self {
            root,
            json_only_root,
            model,
            per_source: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pipeline_dir(&self, pipeline: &PipelineConfig) -> PathBuf {
        self.root.join(pipeline.name())
    }
}

impl OutputSink for FsOutputSink {
    fn write_records(
        &mut self,
        pipeline: &PipelineConfig,
        source_id: &str,
        records: &[Record],
    ) -> Result<(), StorageError> {
        write_json(
            &self.pipeline_dir(pipeline).join(format!("{}.json", source_id)),
            records,
        )?;
        if let Some(json_only) = &self.json_only_root {
            let path = json_only
                .join(pipeline.target_dataset_name())
                .join(&self.model)
                .join(&pipeline.target_db_id)
                .join(format!("response_{}.json", source_id));
            write_json(&path, records)?;
        }
        Ok(())
    }

    fn write_transcript(
        &mut self,
        pipeline: &PipelineConfig,
        transcript: &AttemptTranscript,
    ) -> Result<(), StorageError> {
        if transcript.response.is_empty() {
            return Ok(());
        }
        let dir = self.pipeline_dir(pipeline).join("full");
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.txt", transcript.source_id)))?;

        let heading = format!(
            "{} batch {} attempt {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            transcript.batch,
            transcript.attempt
        );
        write!(file, "\n\n{}", divider(&heading, 80, '='))?;
        if !transcript.system_prompt.is_empty() {
            write!(
                file,
                "\n\n{}\n\n{}",
                divider("system", 50, '-'),
                transcript.system_prompt
            )?;
        }
        write!(
            file,
            "\n\n{}\n\n{}\n\n{}\n\n{}",
            divider("prompt", 50, '-'),
            transcript.prompt,
            divider("response", 50, '-'),
            transcript.response
        )?;
        Ok(())
    }

    fn write_source_stats(
        &mut self,
        pipeline: &PipelineConfig,
        source_id: &str,
        snapshot: &LedgerSnapshot,
    ) -> Result<(), StorageError> {
        let name = pipeline.name();
        let sources = self.per_source.entry(name).or_default();
        sources.insert(source_id.to_string(), snapshot.clone());
        let path = self
            .pipeline_dir(pipeline)
            .join("report")
            .join("stats_per_db.json");
        write_json(&path, &self.per_source[&pipeline.name()])
    }

    fn write_pipeline_stats(
        &mut self,
        pipeline: &PipelineConfig,
        snapshot: &LedgerSnapshot,
        skipped: &[SkippedPrompt],
    ) -> Result<(), StorageError> {
        let report = self.pipeline_dir(pipeline).join("report");
        write_json(&report.join("stats.json"), snapshot)?;
        if !skipped.is_empty() {
            write_json(&report.join("errors.json"), skipped)?;
        }
        Ok(())
    }

    fn write_run_stats(&mut self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        write_json(&self.root.join("stats.json"), snapshot)
    }
}

/// In-memory sink, keyed by pipeline name
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: BTreeMap<(String, String), Vec<Record>>,
    pub transcripts: Vec<AttemptTranscript>,
    pub source_stats: Vec<(String, String, LedgerSnapshot)>,
    pub pipeline_stats: Vec<(String, LedgerSnapshot, Vec<SkippedPrompt>)>,
    pub run_stats: Option<LedgerSnapshot>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for MemorySink {
    fn write_records(
        &mut self,
        pipeline: &PipelineConfig,
        source_id: &str,
        records: &[Record],
    ) -> Result<(), StorageError> {
        self.records
            .insert((pipeline.name(), source_id.to_string()), records.to_vec());
        Ok(())
    }

    fn write_transcript(
        &mut self,
        _pipeline: &PipelineConfig,
        transcript: &AttemptTranscript,
    ) -> Result<(), StorageError> {
        self.transcripts.push(transcript.clone());
        Ok(())
    }

    fn write_source_stats(
        &mut self,
        pipeline: &PipelineConfig,
        source_id: &str,
        snapshot: &LedgerSnapshot,
    ) -> Result<(), StorageError> {
        self.source_stats
            .push((pipeline.name(), source_id.to_string(), snapshot.clone()));
        Ok(())
    }

    fn write_pipeline_stats(
        &mut self,
        pipeline: &PipelineConfig,
        snapshot: &LedgerSnapshot,
        skipped: &[SkippedPrompt],
    ) -> Result<(), StorageError> {
        self.pipeline_stats
            .push((pipeline.name(), snapshot.clone(), skipped.to_vec()));
        Ok(())
    }

    fn write_run_stats(&mut self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        self.run_stats = Some(snapshot.clone());
        Ok(())
    }
}
