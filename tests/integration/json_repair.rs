//! Property tests for the JSON repair engine.

use proptest::prelude::*;
use qmap::generation::{extract_json_array, ErrorKind, ErrorSet, JsonRepairer};
use serde_json::{Map, Value};

fn record_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z_]{1,8}", "[a-zA-Z0-9 ]{0,12}", 1..5).prop_map(|fields| {
        fields
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect()
    })
}

/// One record per line with every separating comma left out
fn without_commas(records: &[Map<String, Value>]) -> String {
    let lines: Vec<String> = records
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect();
    format!("[\n{}\n]", lines.join("\n"))
}

proptest! {
    #[test]
    fn prop_restores_all_dropped_separators(records in prop::collection::vec(record_strategy(), 1..12)) {
        let text = without_commas(&records);
        let mut errors = ErrorSet::new();
        let repaired = JsonRepairer::default().repair(&mut errors, &text).unwrap();
        prop_assert_eq!(&repaired.records, &records);
        prop_assert_eq!(repaired.fixed, records.len() > 1);
        prop_assert!(!errors.any());
    }

    #[test]
    fn prop_valid_arrays_pass_through(records in prop::collection::vec(record_strategy(), 0..8)) {
        let text = serde_json::to_string_pretty(&records).unwrap();
        let mut errors = ErrorSet::new();
        let repaired = JsonRepairer::default().repair(&mut errors, &text).unwrap();
        prop_assert_eq!(repaired.records, records);
        prop_assert!(!repaired.fixed);
    }

    #[test]
    fn prop_chatter_around_array_is_ignored(prefix in "[a-zA-Z .:]{0,30}", suffix in "[a-zA-Z .:]{0,30}") {
        let text = format!("{}\n```json\n[{{\"a\": \"b\"}}]\n```\n{}", prefix, suffix);
        prop_assert_eq!(extract_json_array(&text), "[{\"a\": \"b\"}]");
    }
}

#[test]
fn test_pass_budget_exhaustion_is_decode_error() {
    let records: Vec<Map<String, Value>> = (0..5)
        .map(|i| {
            let mut record = Map::new();
            record.insert("n".to_string(), Value::from(i));
            record
        })
        .collect();
    let text = without_commas(&records);

    let mut errors = ErrorSet::new();
    assert!(JsonRepairer::new(2).repair(&mut errors, &text).is_none());
    assert_eq!(errors.active(), vec![ErrorKind::JsonDecode]);

    let mut errors = ErrorSet::new();
    assert!(JsonRepairer::new(4).repair(&mut errors, &text).is_some());
}
