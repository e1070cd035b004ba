//! Retry controller: the bounded attempt loop for one prompt batch.
//!
//! Each attempt runs classifier, repair and validation in that order. Provider failures
//! count toward a run-wide ceiling that outlives any one batch; reaching it aborts the run.

use super::batch::{
    Attempt, AttemptTranscript, BatchOutcome, BatchReport, PromptBatch,
};
use super::classify::classify;
use super::errors::ErrorKind;
use super::repair::{extract_json_array, JsonRepairer};
use super::validate::{ExpectedIds, StructuralValidator};
use crate::config::GenerationConfig;
use crate::error::ApiError;
use crate::provider::{GenerationClient, GenerationOutput};
use crate::stats::{Counter, SkippedPrompt, StatsLedger};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Receives each attempt transcript as soon as the attempt finishes
pub type TranscriptHook<'h> = dyn FnMut(&AttemptTranscript) -> Result<(), ApiError> + 'h;

/// Attempt budget and failure ceiling
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub max_fail_limit: usize,
    pub backoff: Duration,
    pub max_token_reminder: usize,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts_per_prompt,
            max_fail_limit: config.max_fail_limit,
            backoff: config.retry_backoff(),
            max_token_reminder: config.max_token_reminder,
        }
    }
}

pub struct RetryController<'a> {
    client: &'a dyn GenerationClient,
    policy: RetryPolicy,
    repairer: JsonRepairer,
    validator: StructuralValidator,
    /// Unexpected failures since the run started
    failures: usize,
    /// Max-token failures since the last reminder
    max_token_hits: usize,
}

impl<'a> RetryController<'a> {
    pub fn new(client: &'a dyn GenerationClient, config: &GenerationConfig) -> Self {
        Self {
            client,
            policy: RetryPolicy::from_config(config),
            repairer: JsonRepairer::new(config.max_repair_passes),
            validator: StructuralValidator::from_config(config),
            failures: 0,
            max_token_hits: 0,
        }
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn max_token_hits(&self) -> usize {
        self.max_token_hits
    }

    /// Drive one batch to `Accepted` or `Skipped`, recording every attempt in `ledger`.
    ///
    /// Every answered attempt is passed to `on_transcript` before the next one starts,
    /// so transcripts survive an abort. Returns [`ApiError::FailureLimitReached`] once the
    /// run-wide failure count reaches the ceiling; the ledger already holds the failing
    /// attempt at that point.
    pub async fn run_batch(
        &mut self,
        batch: &PromptBatch,
        ledger: &mut StatsLedger,
        on_transcript: &mut TranscriptHook<'_>,
    ) -> Result<BatchReport, ApiError> {
        let max_attempts = self.policy.max_attempts;
        let mut last = Attempt::new();

        for number in 1..=max_attempts {
            let mut attempt = Attempt::new();
            ledger.increment(Counter::Request);

            match self
                .client
                .generate(&batch.prompt, &batch.system_instruction)
                .await
            {
                Ok(output) => {
                    ledger.add_seconds(Counter::TimeTaken, output.time_taken);
                    ledger.add_count(Counter::InputToken, output.prompt_token_count.unwrap_or(0));
                    ledger.add_count(
                        Counter::OutputToken,
                        output.response_token_count.unwrap_or(0),
                    );
                    self.evaluate(&mut attempt, &output, batch);
                    on_transcript(&AttemptTranscript {
                        source_id: batch.source_id.clone(),
                        batch: batch.index,
                        attempt: number,
                        system_prompt: self.system_prompt(batch),
                        prompt: batch.prompt.clone(),
                        response: attempt.text.clone(),
                        errors: attempt.errors,
                    })?;
                }
                Err(e) => {
                    let message = e.to_string();
                    attempt.errors.set(ErrorKind::Unexpected);
                    ledger.record_unexpected(message.clone());
                    self.failures += 1;
                    warn!(
                        source = %batch.source_id,
                        batch = batch.index,
                        attempt = number,
                        max_attempts,
                        failures = self.failures,
                        error = %message,
                        "Provider call failed"
                    );
                    if self.failures >= self.policy.max_fail_limit {
                        error!(
                            limit = self.policy.max_fail_limit,
                            "Max fail limit reached, aborting run"
                        );
                        return Err(ApiError::FailureLimitReached {
                            limit: self.policy.max_fail_limit,
                            last_error: message,
                        });
                    }
                }
            }

            if !attempt.errors.any() {
                if let Some(records) = attempt.records.take() {
                    let counter = if attempt.fixed {
                        Counter::CorrectedResponse
                    } else {
                        Counter::SuccessResponse
                    };
                    ledger.increment(counter);
                    info!(
                        source = %batch.source_id,
                        batch = batch.index,
                        attempt = number,
                        records = records.len(),
                        corrected = attempt.fixed,
                        "Batch accepted"
                    );
                    return Ok(BatchReport {
                        attempts: number,
                        outcome: BatchOutcome::Accepted {
                            records,
                            corrected: attempt.fixed,
                        },
                    });
                }
            }

            if !attempt.errors.unexpected {
                ledger.increment(Counter::ErrorResponse);
                for kind in attempt.errors.active() {
                    warn!(
                        source = %batch.source_id,
                        batch = batch.index,
                        "Attempt {}/{}: {} ({})",
                        number,
                        max_attempts,
                        kind.description(),
                        kind
                    );
                }
            }
            if attempt.errors.max_token {
                self.note_max_token();
            }

            if number < max_attempts {
                info!(
                    source = %batch.source_id,
                    batch = batch.index,
                    "Retrying ({}/{})",
                    number + 1,
                    max_attempts
                );
                if attempt.errors.unexpected {
                    sleep(self.policy.backoff).await;
                }
            }
            last = attempt;
        }

        warn!(
            source = %batch.source_id,
            batch = batch.index,
            attempts = max_attempts,
            errors = ?last.errors.active(),
            "Max attempts reached, skipping batch"
        );

        Ok(BatchReport {
            attempts: max_attempts,
            outcome: BatchOutcome::Skipped(SkippedPrompt {
                system_prompt: self.system_prompt(batch),
                prompt: batch.prompt.clone(),
                db_id: batch.source_id.clone(),
                questions: batch.questions.clone(),
                errors: last.errors,
            }),
        })
    }

    /// Classifier, then repair, then validation; later stages run only if earlier ones passed.
    fn evaluate(&self, attempt: &mut Attempt, output: &GenerationOutput, batch: &PromptBatch) {
        attempt.text = output.response.clone();
        if !classify(&mut attempt.errors, &output.response, output.finish_reason) {
            return;
        }

        let span = extract_json_array(&output.response);
        let Some(repaired) = self.repairer.repair(&mut attempt.errors, span) else {
            return;
        };
        attempt.fixed = repaired.fixed;
        if repaired.fixed {
            debug!(source = %batch.source_id, batch = batch.index, "Response repaired");
        }

        let expected = ExpectedIds {
            source: &batch.source_id,
            target: batch.target_id.as_deref(),
        };
        if self
            .validator
            .validate(&mut attempt.errors, &repaired.records, expected)
        {
            attempt.records = Some(repaired.records);
        }
    }

    fn system_prompt(&self, batch: &PromptBatch) -> String {
        if self.client.uses_system_instruction() {
            batch.system_instruction.clone()
        } else {
            String::new()
        }
    }

    fn note_max_token(&mut self) {
        self.max_token_hits += 1;
        if self.max_token_hits >= self.policy.max_token_reminder {
            warn!(
                hits = self.max_token_hits,
                "Responses keep hitting the output token limit; consider lowering \
                 max_questions_per_prompt or raising the model's output limit"
            );
            self.max_token_hits = 0;
        }
    }
}
