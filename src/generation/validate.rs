//! Post-parse structural checks on a batch of records.

use super::errors::{ErrorKind, ErrorSet};
use super::repair::Record;
use crate::config::GenerationConfig;
use std::collections::BTreeSet;

/// True when every record's key set equals `required` exactly.
pub fn fields_match(records: &[Record], required: &BTreeSet<String>) -> bool {
    records.iter().all(|record| {
        record.len() == required.len() && record.keys().all(|key| required.contains(key))
    })
}

/// Expected database ids for one batch
#[derive(Debug, Clone, Copy)]
pub struct ExpectedIds<'a> {
    pub source: &'a str,
    pub target: Option<&'a str>,
}

/// Count records whose id fields differ from the expected ids.
///
/// A missing or non-string id counts as a mismatch.
pub fn count_identity_mismatches(
    records: &[Record],
    source_field: &str,
    target_field: &str,
    expected: ExpectedIds<'_>,
) -> usize {
    let matches = |record: &Record, field: &str, id: &str| {
        record.get(field).and_then(|v| v.as_str()) == Some(id)
    };
    records
        .iter()
        .filter(|record| {
            !matches(record, source_field, expected.source)
                || expected
                    .target
                    .map(|target| !matches(record, target_field, target))
                    .unwrap_or(false)
        })
        .count()
}

#[derive(Debug, Clone)]
pub struct StructuralValidator {
    required_fields: BTreeSet<String>,
    source_id_field: String,
    target_id_field: String,
    fields_checking: bool,
    db_id_matching: bool,
}

impl StructuralValidator {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            required_fields: config.fields_to_check.iter().cloned().collect(),
            source_id_field: config.source_id_field.clone(),
            target_id_field: config.target_id_field.clone(),
            fields_checking: config.validation.fields_checking,
            db_id_matching: config.validation.db_id_matching,
        }
    }

    /// Run the enabled checks; the identity check is skipped once the field check failed.
    pub fn validate(
        &self,
        errors: &mut ErrorSet,
        records: &[Record],
        expected: ExpectedIds<'_>,
    ) -> bool {
        if self.fields_checking && !fields_match(records, &self.required_fields) {
            errors.set(ErrorKind::FieldsMismatch);
            return false;
        }
        if self.db_id_matching {
            let mismatches = count_identity_mismatches(
                records,
                &self.source_id_field,
                &self.target_id_field,
                expected,
            );
            if mismatches > 0 {
                tracing::debug!(mismatches, source = expected.source, "Database id mismatch");
                errors.set(ErrorKind::DbIdMatching);
                return false;
            }
        }
        true
    }
}
