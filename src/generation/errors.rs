//! Attempt-level failure kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One recognized way a generation attempt can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyOutput,
    MaxToken,
    Recitation,
    InvalidEscape,
    JsonDecode,
    FieldsMismatch,
    DbIdMatching,
    Unexpected,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::EmptyOutput,
        ErrorKind::MaxToken,
        ErrorKind::Recitation,
        ErrorKind::InvalidEscape,
        ErrorKind::JsonDecode,
        ErrorKind::FieldsMismatch,
        ErrorKind::DbIdMatching,
        ErrorKind::Unexpected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::EmptyOutput => "empty_output",
            ErrorKind::MaxToken => "max_token",
            ErrorKind::Recitation => "recitation",
            ErrorKind::InvalidEscape => "invalid_escape",
            ErrorKind::JsonDecode => "json_decode",
            ErrorKind::FieldsMismatch => "fields_mismatch",
            ErrorKind::DbIdMatching => "db_id_matching",
            ErrorKind::Unexpected => "unexpected",
        }
    }

    /// Operator-facing explanation used in attempt logs
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::EmptyOutput => "response was empty",
            ErrorKind::MaxToken => "response hit the output token limit",
            ErrorKind::Recitation => "response blocked for recitation",
            ErrorKind::InvalidEscape => "response contains an invalid escape sequence",
            ErrorKind::JsonDecode => "response is not a valid JSON array of records",
            ErrorKind::FieldsMismatch => "record fields differ from the required field set",
            ErrorKind::DbIdMatching => "record database ids do not match the prompt",
            ErrorKind::Unexpected => "provider call failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags for one attempt. Starts all false; serializes as `kind -> bool`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSet {
    pub empty_output: bool,
    pub max_token: bool,
    pub recitation: bool,
    pub invalid_escape: bool,
    pub json_decode: bool,
    pub fields_mismatch: bool,
    pub db_id_matching: bool,
    pub unexpected: bool,
}

impl ErrorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: ErrorKind) {
        *self.flag_mut(kind) = true;
    }

    pub fn is_set(&self, kind: ErrorKind) -> bool {
        match kind {
            ErrorKind::EmptyOutput => self.empty_output,
            ErrorKind::MaxToken => self.max_token,
            ErrorKind::Recitation => self.recitation,
            ErrorKind::InvalidEscape => self.invalid_escape,
            ErrorKind::JsonDecode => self.json_decode,
            ErrorKind::FieldsMismatch => self.fields_mismatch,
            ErrorKind::DbIdMatching => self.db_id_matching,
            ErrorKind::Unexpected => self.unexpected,
        }
    }

    /// True when any flag is set
    pub fn any(&self) -> bool {
        ErrorKind::ALL.iter().any(|kind| self.is_set(*kind))
    }

    /// Set kinds, in taxonomy order
    pub fn active(&self) -> Vec<ErrorKind> {
        ErrorKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.is_set(*kind))
            .collect()
    }

    fn flag_mut(&mut self, kind: ErrorKind) -> &mut bool {
        match kind {
            ErrorKind::EmptyOutput => &mut self.empty_output,
            ErrorKind::MaxToken => &mut self.max_token,
            ErrorKind::Recitation => &mut self.recitation,
            ErrorKind::InvalidEscape => &mut self.invalid_escape,
            ErrorKind::JsonDecode => &mut self.json_decode,
            ErrorKind::FieldsMismatch => &mut self.fields_mismatch,
            ErrorKind::DbIdMatching => &mut self.db_id_matching,
            ErrorKind::Unexpected => &mut self.unexpected,
        }
    }
}
