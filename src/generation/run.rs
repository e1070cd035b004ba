//! Run driver: pipelines, then source units, then prompt batches.
//!
//! Owns the three ledgers. A source unit's ledger merges into its pipeline's at unit
//! completion and the pipeline's merges into the run's at pipeline completion. On a
//! global abort whatever was gathered so far is merged and flushed before returning.

use super::batch::{AttemptTranscript, BatchOutcome, PromptBatch};
use super::controller::RetryController;
use super::repair::Record;
use crate::config::{PipelineConfig, QmapConfig};
use crate::dataset::{DatasetProvider, PipelineDataset, SourceUnit};
use crate::error::ApiError;
use crate::prompt::{PromptAssembler, PromptContext};
use crate::provider::GenerationClient;
use crate::sink::OutputSink;
use crate::stats::{LedgerSchema, LedgerSnapshot, StatsLedger};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

/// Result of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stats: LedgerSnapshot,
    pub pipelines_processed: usize,
    pub pipelines_failed: usize,
    pub batches_accepted: usize,
    pub batches_skipped: usize,
    /// Set when the run stopped at the failure ceiling
    pub abort_reason: Option<String>,
}

impl RunSummary {
    pub fn aborted(&self) -> bool {
        self.abort_reason.is_some()
    }
}

struct Ledgers {
    run: StatsLedger,
    pipeline: StatsLedger,
    unit: StatsLedger,
}

#[derive(Default)]
struct Tally {
    pipelines_processed: usize,
    pipelines_failed: usize,
    batches_accepted: usize,
    batches_skipped: usize,
}

pub struct GenerationRun<'a> {
    config: &'a QmapConfig,
    client: &'a dyn GenerationClient,
    datasets: &'a dyn DatasetProvider,
    assembler: &'a dyn PromptAssembler,
    sink: &'a mut dyn OutputSink,
}

impl<'a> GenerationRun<'a> {
    pub fn new(
        config: &'a QmapConfig,
        client: &'a dyn GenerationClient,
        datasets: &'a dyn DatasetProvider,
        assembler: &'a dyn PromptAssembler,
        sink: &'a mut dyn OutputSink,
    ) -> Self {
        Self {
            config,
            client,
            datasets,
            assembler,
            sink,
        }
    }

    /// Process every configured pipeline in order.
    ///
    /// A failure-ceiling abort still returns `Ok`, with `abort_reason` set and all
    /// ledgers flushed. Sink and prompt errors are returned as `Err`.
    pub async fn execute(&mut self) -> Result<RunSummary, ApiError> {
        let config = self.config;
        let run_schema = LedgerSchema::standard()
            .with_label("model_origin", config.model.origin.as_str())
            .with_label("model_name", self.client.model_name());
        let mut ledgers = Ledgers {
            run: StatsLedger::new(run_schema),
            pipeline: StatsLedger::standard(),
            unit: StatsLedger::standard(),
        };
        let mut tally = Tally::default();
        let mut controller = RetryController::new(self.client, &config.generation);

        let mut abort_reason = None;
        for (index, pipeline) in config.pipelines.iter().enumerate() {
            ledgers.pipeline.reset();
            info!(pipeline = %pipeline.name(), "Pipeline {} started", index + 1);

            let dataset = match self.datasets.load(pipeline) {
                Ok(dataset) => dataset,
                Err(e) => {
                    error!(pipeline = %pipeline.name(), error = %e, "Pipeline skipped");
                    tally.pipelines_failed += 1;
                    continue;
                }
            };
            if dataset.filtered_out > 0 {
                info!(
                    pipeline = %pipeline.name(),
                    skipped = dataset.filtered_out,
                    "Source databases outside source_db_ids were skipped"
                );
            }

            for unit in &dataset.units {
                ledgers.unit.reset();
                let outcome = self
                    .run_unit(&mut controller, pipeline, &dataset, unit, &mut ledgers, &mut tally)
                    .await;
                ledgers.unit.close_unit();
                self.sink.write_source_stats(
                    pipeline,
                    &unit.source_id,
                    &ledgers.unit.snapshot(),
                )?;
                ledgers.pipeline.merge(&ledgers.unit);

                match outcome {
                    Ok(()) => {}
                    Err(e @ ApiError::FailureLimitReached { .. }) => {
                        abort_reason = Some(e.to_string());
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            self.sink.write_pipeline_stats(
                pipeline,
                &ledgers.pipeline.snapshot(),
                ledgers.pipeline.skipped(),
            )?;
            ledgers.run.merge(&ledgers.pipeline);
            tally.pipelines_processed += 1;
            info!(
                pipeline = %pipeline.name(),
                skipped_batches = ledgers.pipeline.skipped().len(),
                "Pipeline finished"
            );

            if abort_reason.is_some() {
                break;
            }
        }

        let stats = ledgers.run.snapshot();
        self.sink.write_run_stats(&stats)?;
        if let Some(reason) = &abort_reason {
            error!(reason = %reason, "Run aborted");
        } else {
            info!("Run finished");
        }

        Ok(RunSummary {
            stats,
            pipelines_processed: tally.pipelines_processed,
            pipelines_failed: tally.pipelines_failed,
            batches_accepted: tally.batches_accepted,
            batches_skipped: tally.batches_skipped,
            abort_reason,
        })
    }

    async fn run_unit(
        &mut self,
        controller: &mut RetryController<'_>,
        pipeline: &PipelineConfig,
        dataset: &PipelineDataset,
        unit: &SourceUnit,
        ledgers: &mut Ledgers,
        tally: &mut Tally,
    ) -> Result<(), ApiError> {
        let source_schema = dataset
            .source_schemas
            .get(&unit.source_id)
            .cloned()
            .unwrap_or(Value::Null);
        let batch_size = self.config.generation.max_questions_per_prompt.max(1);
        let mut records: Vec<Record> = Vec::new();

        info!(
            pipeline = %pipeline.name(),
            source = %unit.source_id,
            questions = unit.questions.len(),
            "Source unit started"
        );

        for (index, questions) in unit.questions.chunks(batch_size).enumerate() {
            let prompt = self.assembler.assemble(&PromptContext {
                source_db_id: &unit.source_id,
                source_schema: &source_schema,
                target_db_id: &pipeline.target_db_id,
                target_schema: &dataset.target_schema,
                target_samples: &dataset.target_samples,
                questions,
            })?;
            let batch = PromptBatch {
                source_id: unit.source_id.clone(),
                target_id: Some(pipeline.target_db_id.clone()),
                index,
                questions: questions.to_vec(),
                prompt,
                system_instruction: self.assembler.system_instruction().to_string(),
            };

            let sink = &mut *self.sink;
            let report = controller
                .run_batch(&batch, &mut ledgers.unit, &mut |transcript: &AttemptTranscript| {
                    sink.write_transcript(pipeline, transcript).map_err(ApiError::from)
                })
                .await?;

            match report.outcome {
                BatchOutcome::Accepted { records: accepted, .. } => {
                    records.extend(accepted);
                    self.sink.write_records(pipeline, &unit.source_id, &records)?;
                    tally.batches_accepted += 1;
                }
                BatchOutcome::Skipped(skipped) => {
                    warn!(
                        source = %unit.source_id,
                        batch = index,
                        "Batch skipped after {} attempts",
                        report.attempts
                    );
                    ledgers.pipeline.push_skipped(skipped);
                    tally.batches_skipped += 1;
                }
            }
        }
        Ok(())
    }
}
