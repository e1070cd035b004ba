//! Prompt batches and their terminal outcomes.

use super::errors::ErrorSet;
use super::repair::Record;
use crate::stats::SkippedPrompt;
use serde::Serialize;
use serde_json::Value;

/// Consecutive questions of one source unit sent as one generation request
#[derive(Debug, Clone)]
pub struct PromptBatch {
    pub source_id: String,
    /// Expected target database id, when one is configured
    pub target_id: Option<String>,
    /// Position of the batch within its source unit
    pub index: usize,
    pub questions: Vec<Value>,
    pub prompt: String,
    pub system_instruction: String,
}

/// Terminal state of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Accepted,
    Skipped,
}

/// One attempt's raw text and verdict
#[derive(Debug, Clone, Default)]
pub struct Attempt {
    pub text: String,
    pub records: Option<Vec<Record>>,
    pub errors: ErrorSet,
    pub fixed: bool,
}

impl Attempt {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Raw response of one attempt the provider answered
#[derive(Debug, Clone, Serialize)]
pub struct AttemptTranscript {
    pub source_id: String,
    pub batch: usize,
    pub attempt: usize,
    /// Empty when the provider does not send system instructions
    pub system_prompt: String,
    pub prompt: String,
    pub response: String,
    pub errors: ErrorSet,
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Accepted {
        records: Vec<Record>,
        corrected: bool,
    },
    Skipped(SkippedPrompt),
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub attempts: usize,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn state(&self) -> BatchState {
        match self.outcome {
            BatchOutcome::Accepted { .. } => BatchState::Accepted,
            BatchOutcome::Skipped(_) => BatchState::Skipped,
        }
    }
}
