//! Stats Ledger
//!
//! Counter bags for the three levels of a run (run, pipeline, source unit). A ledger's
//! key set is fixed by its [`LedgerSchema`] at construction. Children fold into parents
//! with [`StatsLedger::merge`]; derived rates exist only in [`LedgerSnapshot`]s.

use crate::generation::errors::ErrorSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Count(u64),
    Real(f64),
    Text(String),
}

impl StatValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatValue::Count(n) => Some(*n as f64),
            StatValue::Real(x) => Some(*x),
            StatValue::Text(_) => None,
        }
    }
}

/// Standard counters every ledger carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Summed provider latency, seconds
    TimeTaken,
    /// Wall-clock seconds for the unit of work
    RealTime,
    InputToken,
    OutputToken,
    Request,
    Response,
    SuccessResponse,
    ErrorResponse,
    CorrectedResponse,
    UnexpectedError,
}

impl Counter {
    pub const ALL: [Counter; 10] = [
        Counter::TimeTaken,
        Counter::RealTime,
        Counter::InputToken,
        Counter::OutputToken,
        Counter::Request,
        Counter::Response,
        Counter::SuccessResponse,
        Counter::ErrorResponse,
        Counter::CorrectedResponse,
        Counter::UnexpectedError,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Counter::TimeTaken => "time_taken",
            Counter::RealTime => "real_time",
            Counter::InputToken => "input_token",
            Counter::OutputToken => "output_token",
            Counter::Request => "request",
            Counter::Response => "response",
            Counter::SuccessResponse => "success_response",
            Counter::ErrorResponse => "error_response",
            Counter::CorrectedResponse => "corrected_response",
            Counter::UnexpectedError => "unexpected_error",
        }
    }

    fn is_seconds(self) -> bool {
        matches!(self, Counter::TimeTaken | Counter::RealTime)
    }

    fn zero(self) -> StatValue {
        if self.is_seconds() {
            StatValue::Real(0.0)
        } else {
            StatValue::Count(0)
        }
    }
}

/// Key set and reset values of a ledger
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSchema {
    defaults: BTreeMap<String, StatValue>,
}

impl LedgerSchema {
    /// The standard counters, all zero
    pub fn standard() -> Self {
        Self {
            defaults: Counter::ALL
                .iter()
                .map(|counter| (counter.key().to_string(), counter.zero()))
                .collect(),
        }
    }

    /// Add an extra numeric counter starting at zero
    pub fn with_counter(mut self, key: &str) -> Self {
        self.defaults.insert(key.to_string(), StatValue::Count(0));
        self
    }

    /// Add a text label that survives resets, such as a model name
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.defaults
            .insert(key.to_string(), StatValue::Text(value.to_string()));
        self
    }
}

impl Default for LedgerSchema {
    fn default() -> Self {
        Self::standard()
    }
}

/// Audit entry for a batch that exhausted its attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPrompt {
    /// Empty when the provider does not send system instructions
    pub system_prompt: String,
    pub prompt: String,
    pub db_id: String,
    pub questions: Vec<Value>,
    pub errors: ErrorSet,
}

#[derive(Debug, Clone)]
pub struct StatsLedger {
    schema: LedgerSchema,
    values: BTreeMap<String, StatValue>,
    unexpected_errors: Vec<String>,
    skipped: Vec<SkippedPrompt>,
    started: Instant,
}

impl StatsLedger {
    pub fn new(schema: LedgerSchema) -> Self {
        Self {
            values: schema.defaults.clone(),
            schema,
            unexpected_errors: Vec::new(),
            skipped: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn standard() -> Self {
        Self::new(LedgerSchema::standard())
    }

    /// Restore the schema template, clear both lists and restart the clock.
    pub fn reset(&mut self) {
        self.values = self.schema.defaults.clone();
        self.unexpected_errors.clear();
        self.skipped.clear();
        self.started = Instant::now();
    }

    pub fn increment(&mut self, counter: Counter) {
        self.add_count(counter, 1);
    }

    pub fn add_count(&mut self, counter: Counter, amount: u64) {
        if let Some(value) = self.values.get_mut(counter.key()) {
            match value {
                StatValue::Count(n) => *n += amount,
                StatValue::Real(x) => *x += amount as f64,
                StatValue::Text(_) => {}
            }
        }
    }

    pub fn add_seconds(&mut self, counter: Counter, seconds: f64) {
        if let Some(value) = self.values.get_mut(counter.key()) {
            match value {
                StatValue::Real(x) => *x += seconds,
                StatValue::Count(n) => *n += seconds.max(0.0).round() as u64,
                StatValue::Text(_) => {}
            }
        }
    }

    pub fn set(&mut self, counter: Counter, value: StatValue) {
        if let Some(slot) = self.values.get_mut(counter.key()) {
            *slot = value;
        }
    }

    pub fn count(&self, counter: Counter) -> u64 {
        match self.values.get(counter.key()) {
            Some(StatValue::Count(n)) => *n,
            Some(StatValue::Real(x)) => *x as u64,
            _ => 0,
        }
    }

    pub fn seconds(&self, counter: Counter) -> f64 {
        self.values
            .get(counter.key())
            .and_then(StatValue::as_f64)
            .unwrap_or(0.0)
    }

    pub fn get(&self, key: &str) -> Option<&StatValue> {
        self.values.get(key)
    }

    /// Count an unexpected provider failure and keep its message.
    pub fn record_unexpected(&mut self, message: impl Into<String>) {
        self.increment(Counter::UnexpectedError);
        self.unexpected_errors.push(message.into());
    }

    pub fn unexpected_errors(&self) -> &[String] {
        &self.unexpected_errors
    }

    pub fn push_skipped(&mut self, skipped: SkippedPrompt) {
        self.skipped.push(skipped);
    }

    pub fn skipped(&self) -> &[SkippedPrompt] {
        &self.skipped
    }

    /// Close a source unit: `response` becomes the sum of its outcomes and
    /// `real_time` the elapsed time since the last reset.
    pub fn close_unit(&mut self) {
        let response = self.count(Counter::SuccessResponse)
            + self.count(Counter::ErrorResponse)
            + self.count(Counter::CorrectedResponse);
        self.set(Counter::Response, StatValue::Count(response));
        self.set(
            Counter::RealTime,
            StatValue::Real(self.started.elapsed().as_secs_f64()),
        );
    }

    /// Fold a child ledger in by summing numeric keys both ledgers carry.
    ///
    /// Text entries and keys absent on either side are left alone. Lists are not merged.
    pub fn merge(&mut self, child: &StatsLedger) {
        for (key, value) in self.values.iter_mut() {
            let Some(other) = child.values.get(key) else {
                continue;
            };
            match (value, other) {
                (StatValue::Count(a), StatValue::Count(b)) => *a += *b,
                (StatValue::Real(a), StatValue::Real(b)) => *a += *b,
                (StatValue::Real(a), StatValue::Count(b)) => *a += *b as f64,
                (StatValue::Count(a), StatValue::Real(b)) => *a += b.max(0.0).round() as u64,
                _ => {}
            }
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let success = self.count(Counter::SuccessResponse);
        let corrected = self.count(Counter::CorrectedResponse);
        let requests = self.count(Counter::Request);
        let accepted = success + corrected;

        let ratio = |num: f64, den: u64| if den == 0 { 0.0 } else { num / den as f64 };

        LedgerSnapshot {
            stats: self.values.clone(),
            success_rate: ratio(accepted as f64, requests),
            correction_rate: ratio(corrected as f64, accepted),
            mean_latency: ratio(self.seconds(Counter::TimeTaken), requests),
            unexpected_errors: self.unexpected_errors.clone(),
        }
    }
}

/// Point-in-time copy of a ledger with derived rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(flatten)]
    pub stats: BTreeMap<String, StatValue>,
    /// Accepted batches per request
    pub success_rate: f64,
    /// Share of accepted batches that needed repair
    pub correction_rate: f64,
    /// Mean provider latency per request, seconds
    pub mean_latency: f64,
    #[serde(default)]
    pub unexpected_errors: Vec<String>,
}

impl LedgerSnapshot {
    pub fn count(&self, counter: Counter) -> u64 {
        match self.stats.get(counter.key()) {
            Some(StatValue::Count(n)) => *n,
            Some(StatValue::Real(x)) => *x as u64,
            _ => 0,
        }
    }

    pub fn seconds(&self, counter: Counter) -> f64 {
        self.stats
            .get(counter.key())
            .and_then(StatValue::as_f64)
            .unwrap_or(0.0)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        match self.stats.get(key) {
            Some(StatValue::Text(text)) => Some(text),
            _ => None,
        }
    }
}
