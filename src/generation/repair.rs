//! JSON repair engine.
//!
//! Models routinely drop the comma between two adjacent records. The engine parses the
//! response and, while the decoder reports a missing `,`, inserts one and parses again.
//! Only commas are ever inserted; every other decode failure is classified and returned.

use super::errors::{ErrorKind, ErrorSet};
use serde_json::{Map, Value};

/// One generated record: a JSON object keyed by field name
pub type Record = Map<String, Value>;

/// Narrow a response to the span from the first `[` to the last `]`.
///
/// Strips chatter and code fences around the array. Text without such a span is
/// returned unchanged so the decoder reports on the whole response.
pub fn extract_json_array(text: &str) -> &str {
    match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start <= end => &text[start..=end],
        _ => text,
    }
}

enum DecodeFailure {
    /// Decoder wanted `,` between elements; carries the byte offset it stopped at
    MissingComma(usize),
    InvalidEscape,
    Other,
}

fn diagnose(text: &str, error: &serde_json::Error) -> DecodeFailure {
    let message = error.to_string();
    if message.starts_with("expected `,` or `]`") || message.starts_with("expected `,` or `}`") {
        match byte_offset(text, error.line(), error.column()) {
            Some(offset) => DecodeFailure::MissingComma(offset),
            None => DecodeFailure::Other,
        }
    } else if message.starts_with("invalid escape") {
        DecodeFailure::InvalidEscape
    } else {
        DecodeFailure::Other
    }
}

/// Byte offset of a decoder position (1-based line, 1-based byte column).
fn byte_offset(text: &str, line: usize, column: usize) -> Option<usize> {
    if line == 0 {
        return None;
    }
    let line_start = if line == 1 {
        0
    } else {
        text.match_indices('\n').nth(line - 2).map(|(i, _)| i + 1)?
    };
    let offset = (line_start + column.saturating_sub(1)).min(text.len());
    text.is_char_boundary(offset).then_some(offset)
}

/// Where to put the comma for a defect the decoder noticed at `offset`.
///
/// The decoder reports the start of the next element, which usually sits on the line
/// after the real defect. When the preceding line does not already end in a comma the
/// comma goes at that line break instead.
fn insertion_point(text: &str, offset: usize) -> usize {
    match text[..offset].rfind('\n') {
        Some(newline) if newline > 0 && !text[..newline].ends_with(',') => newline,
        _ => offset,
    }
}

/// Outcome of one repair call
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub records: Vec<Record>,
    /// True when at least one comma was inserted
    pub fixed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct JsonRepairer {
    max_passes: usize,
}

impl JsonRepairer {
    pub fn new(max_passes: usize) -> Self {
        Self { max_passes }
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    /// Parse `text` as an array of records, inserting commas where the decoder
    /// reports one missing. On failure the matching flag is set in `errors`.
    pub fn repair(&self, errors: &mut ErrorSet, text: &str) -> Option<Repaired> {
        let mut candidate = text.to_string();
        let mut passes = 0;

        loop {
            let error = match serde_json::from_str::<Value>(&candidate) {
                Ok(value) => {
                    return match serde_json::from_value::<Vec<Record>>(value) {
                        Ok(records) => Some(Repaired {
                            records,
                            fixed: passes > 0,
                        }),
                        Err(_) => {
                            errors.set(ErrorKind::JsonDecode);
                            None
                        }
                    };
                }
                Err(error) => error,
            };

            match diagnose(&candidate, &error) {
                DecodeFailure::MissingComma(offset) if passes < self.max_passes => {
                    let at = insertion_point(&candidate, offset);
                    candidate.insert(at, ',');
                    passes += 1;
                }
                DecodeFailure::InvalidEscape => {
                    errors.set(ErrorKind::InvalidEscape);
                    return None;
                }
                DecodeFailure::MissingComma(_) | DecodeFailure::Other => {
                    errors.set(ErrorKind::JsonDecode);
                    return None;
                }
            }
        }
    }
}

impl Default for JsonRepairer {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(text: &str) -> Vec<Record> {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_valid_input_is_untouched() {
        let mut errors = ErrorSet::new();
        let text = r#"[{"a": 1}, {"a": 2}]"#;
        let repaired = JsonRepairer::default().repair(&mut errors, text).unwrap();
        assert!(!repaired.fixed);
        assert_eq!(repaired.records, parse(text));
        assert!(!errors.any());
    }

    #[test]
    fn test_single_missing_comma_same_line() {
        let mut errors = ErrorSet::new();
        let repaired = JsonRepairer::default()
            .repair(&mut errors, r#"[{"a":1} {"a":2}]"#)
            .unwrap();
        assert!(repaired.fixed);
        assert_eq!(repaired.records, parse(r#"[{"a":1}, {"a":2}]"#));
        assert!(!errors.any());
    }

    #[test]
    fn test_missing_comma_goes_at_previous_line_break() {
        let mut errors = ErrorSet::new();
        let text = "[\n  {\"a\": 1}\n  {\"a\": 2}\n]";
        let repaired = JsonRepairer::default().repair(&mut errors, text).unwrap();
        assert!(repaired.fixed);
        assert_eq!(repaired.records.len(), 2);
    }

    #[test]
    fn test_missing_comma_between_fields() {
        let mut errors = ErrorSet::new();
        let text = "[\n  {\n    \"a\": 1\n    \"b\": 2\n  }\n]";
        let repaired = JsonRepairer::default().repair(&mut errors, text).unwrap();
        assert!(repaired.fixed);
        assert_eq!(repaired.records, parse(r#"[{"a": 1, "b": 2}]"#));
    }

    #[test]
    fn test_several_missing_commas() {
        let mut errors = ErrorSet::new();
        let text = "[\n{\"a\": 1}\n{\"a\": 2}\n{\"a\": 3}\n{\"a\": 4}\n]";
        let repaired = JsonRepairer::default().repair(&mut errors, text).unwrap();
        assert!(repaired.fixed);
        assert_eq!(repaired.records.len(), 4);
    }

    #[test]
    fn test_invalid_escape_is_not_repaired() {
        let mut errors = ErrorSet::new();
        let result = JsonRepairer::default().repair(&mut errors, r#"[{"a": "\q"}]"#);
        assert!(result.is_none());
        assert_eq!(errors.active(), vec![ErrorKind::InvalidEscape]);
    }

    #[test]
    fn test_other_decode_errors() {
        let mut errors = ErrorSet::new();
        assert!(JsonRepairer::default()
            .repair(&mut errors, "not json at all")
            .is_none());
        assert_eq!(errors.active(), vec![ErrorKind::JsonDecode]);
    }

    #[test]
    fn test_wrong_shape_is_decode_error() {
        let mut errors = ErrorSet::new();
        assert!(JsonRepairer::default()
            .repair(&mut errors, r#"{"a": 1}"#)
            .is_none());
        assert_eq!(errors.active(), vec![ErrorKind::JsonDecode]);

        let mut errors = ErrorSet::new();
        assert!(JsonRepairer::default().repair(&mut errors, "[1, 2]").is_none());
        assert!(errors.json_decode);
    }

    #[test]
    fn test_pass_limit_exhaustion_is_decode_error() {
        let mut errors = ErrorSet::new();
        let text = "[\n{\"a\": 1}\n{\"a\": 2}\n{\"a\": 3}\n]";
        assert!(JsonRepairer::new(1).repair(&mut errors, text).is_none());
        assert_eq!(errors.active(), vec![ErrorKind::JsonDecode]);
    }

    #[test]
    fn test_extract_json_array_strips_chatter() {
        let text = "Here you go:\n```json\n[{\"a\": 1}]\n```\nDone.";
        assert_eq!(extract_json_array(text), "[{\"a\": 1}]");
        assert_eq!(extract_json_array("no array"), "no array");
        assert_eq!(extract_json_array("] backwards ["), "] backwards [");
    }

    fn record_strategy() -> impl Strategy<Value = Record> {
        prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 1..4).prop_map(|fields| {
            fields
                .into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_valid_arrays_are_idempotent(records in prop::collection::vec(record_strategy(), 0..6)) {
            let text = serde_json::to_string_pretty(&records).unwrap();
            let mut errors = ErrorSet::new();
            let repaired = JsonRepairer::default().repair(&mut errors, &text).unwrap();
            prop_assert!(!repaired.fixed);
            prop_assert_eq!(repaired.records, records);
            prop_assert!(!errors.any());
        }

        #[test]
        fn prop_one_dropped_separator_is_restored(
            records in prop::collection::vec(record_strategy(), 2..6),
            gap in any::<prop::sample::Index>(),
        ) {
            let lines: Vec<String> = records
                .iter()
                .map(|r| serde_json::to_string(r).unwrap())
                .collect();
            let dropped = gap.index(lines.len() - 1);
            let mut text = String::from("[\n");
            for (i, line) in lines.iter().enumerate() {
                text.push_str(line);
                if i + 1 < lines.len() && i != dropped {
                    text.push(',');
                }
                text.push('\n');
            }
            text.push(']');

            let mut errors = ErrorSet::new();
            let repaired = JsonRepairer::default().repair(&mut errors, &text).unwrap();
            prop_assert!(repaired.fixed);
            prop_assert_eq!(repaired.records, records);
        }
    }
}
