//! End-to-end runs over an on-disk dataset with a scripted provider.

use crate::integration::test_utils::{
    config, pipeline, record, source_of, valid_response, write_dataset, write_prompts, Reply,
    ScriptedClient,
};
use qmap::config::QmapConfig;
use qmap::dataset::FsDatasetProvider;
use qmap::generation::{GenerationRun, RunSummary};
use qmap::prompt::{PromptTemplates, TemplatePromptAssembler};
use qmap::sink::{FsOutputSink, MemorySink, OutputSink};
use qmap::stats::Counter;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

async fn run(
    root: &Path,
    config: &QmapConfig,
    client: &ScriptedClient,
    sink: &mut dyn OutputSink,
) -> RunSummary {
    let templates = PromptTemplates::load(root, &config.generation).unwrap();
    let assembler = TemplatePromptAssembler::new(templates);
    let datasets = FsDatasetProvider::new(root);
    GenerationRun::new(config, client, &datasets, &assembler, sink)
        .execute()
        .await
        .unwrap()
}

fn workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    write_dataset(temp.path());
    write_prompts(temp.path());
    temp
}

#[tokio::test]
async fn test_all_batches_accepted() {
    let temp = workspace();
    let config = config();
    let client = ScriptedClient::new(|prompt, _| Reply::Text(valid_response(prompt)));
    let mut sink = MemorySink::new();

    let summary = run(temp.path(), &config, &client, &mut sink).await;

    assert!(!summary.aborted());
    assert_eq!(client.calls(), 3);
    assert_eq!(summary.batches_accepted, 3);
    assert_eq!(summary.batches_skipped, 0);
    assert_eq!(summary.pipelines_processed, 1);

    let name = pipeline().name();
    assert_eq!(
        sink.records[&(name.clone(), "concert_singer".to_string())].len(),
        2
    );
    assert_eq!(sink.records[&(name, "pets_1".to_string())].len(), 1);

    let stats = sink.run_stats.as_ref().unwrap();
    assert_eq!(stats.count(Counter::Request), 3);
    assert_eq!(stats.count(Counter::SuccessResponse), 3);
    assert_eq!(stats.count(Counter::Response), 3);
    assert_eq!(stats.count(Counter::InputToken), 300);
    assert_eq!(stats.label("model_name"), Some("scripted-model"));
    assert_eq!(stats.label("model_origin"), Some("openai"));
    assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_unit_ledgers_sum_to_run_ledger() {
    let temp = workspace();
    let config = config();
    let client = ScriptedClient::new(|prompt, _| {
        if source_of(prompt) == "pets_1" {
            Reply::Text(serde_json::json!([record("other", "formula_1")]).to_string())
        } else {
            Reply::Text(valid_response(prompt))
        }
    });
    let mut sink = MemorySink::new();

    let summary = run(temp.path(), &config, &client, &mut sink).await;
    let run_stats = sink.run_stats.as_ref().unwrap();

    for counter in [
        Counter::Request,
        Counter::Response,
        Counter::SuccessResponse,
        Counter::ErrorResponse,
        Counter::InputToken,
        Counter::OutputToken,
    ] {
        let from_units: u64 = sink
            .source_stats
            .iter()
            .map(|(_, _, snapshot)| snapshot.count(counter))
            .sum();
        assert_eq!(from_units, run_stats.count(counter), "{}", counter.key());
        assert_eq!(sink.pipeline_stats[0].1.count(counter), run_stats.count(counter));
    }

    assert_eq!(run_stats.count(Counter::Request), 5);
    assert_eq!(run_stats.count(Counter::ErrorResponse), 3);
    assert_eq!(
        run_stats.count(Counter::Response),
        run_stats.count(Counter::SuccessResponse)
            + run_stats.count(Counter::ErrorResponse)
            + run_stats.count(Counter::CorrectedResponse)
    );
    assert_eq!(summary.batches_skipped, 1);
}

#[tokio::test]
async fn test_skipped_batch_is_audited() {
    let temp = workspace();
    let config = config();
    let client = ScriptedClient::new(|prompt, _| {
        if source_of(prompt) == "pets_1" {
            Reply::Text(serde_json::json!([record("other", "formula_1")]).to_string())
        } else {
            Reply::Text(valid_response(prompt))
        }
    });
    let mut sink = MemorySink::new();

    run(temp.path(), &config, &client, &mut sink).await;

    let (_, _, skipped) = &sink.pipeline_stats[0];
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].db_id, "pets_1");
    assert!(skipped[0].errors.db_id_matching);
    assert_eq!(skipped[0].questions.len(), 1);
    assert!(!sink
        .records
        .contains_key(&(pipeline().name(), "pets_1".to_string())));
    assert_eq!(sink.transcripts.len(), 5);
}

#[tokio::test]
async fn test_repaired_responses_counted_as_corrected() {
    let temp = workspace();
    let config = config();
    let client = ScriptedClient::new(|prompt, _| {
        let source = source_of(prompt);
        if source == "concert_singer" {
            let one = record(source, "formula_1").to_string();
            Reply::Text(format!("[\n{}\n{}\n]", one, one))
        } else {
            Reply::Text(valid_response(prompt))
        }
    });
    let mut sink = MemorySink::new();

    run(temp.path(), &config, &client, &mut sink).await;

    let stats = sink.run_stats.as_ref().unwrap();
    assert_eq!(stats.count(Counter::CorrectedResponse), 2);
    assert_eq!(stats.count(Counter::SuccessResponse), 1);
    assert!((stats.correction_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(
        sink.records[&(pipeline().name(), "concert_singer".to_string())].len(),
        4
    );
}

#[tokio::test]
async fn test_failure_ceiling_aborts_run() {
    let temp = workspace();
    let mut config = config();
    config.generation.max_fail_limit = 2;
    let client = ScriptedClient::new(|_, _| Reply::Fail("Connection error: refused".to_string()));
    let mut sink = MemorySink::new();

    let summary = run(temp.path(), &config, &client, &mut sink).await;

    assert!(summary.aborted());
    assert!(summary
        .abort_reason
        .as_deref()
        .unwrap()
        .contains("Max fail limit reached (2"));
    assert_eq!(client.calls(), 2);
    assert_eq!(sink.source_stats.len(), 1);
    assert_eq!(sink.source_stats[0].2.unexpected_errors.len(), 2);

    let stats = sink.run_stats.as_ref().unwrap();
    assert_eq!(stats.count(Counter::Request), 2);
    assert_eq!(stats.count(Counter::UnexpectedError), 2);
    assert_eq!(stats.count(Counter::ErrorResponse), 0);
}

#[tokio::test]
async fn test_failure_count_spans_batches_and_units() {
    let temp = workspace();
    let mut config = config();
    config.generation.max_fail_limit = 3;
    let client = ScriptedClient::new(|prompt, call| {
        if call % 2 == 1 {
            Reply::Fail("timeout".to_string())
        } else {
            Reply::Text(valid_response(prompt))
        }
    });
    let mut sink = MemorySink::new();

    let summary = run(temp.path(), &config, &client, &mut sink).await;

    assert!(summary.aborted());
    assert_eq!(client.calls(), 5);
    assert_eq!(summary.batches_accepted, 2);
    assert_eq!(sink.source_stats.len(), 2);
    assert_eq!(sink.run_stats.as_ref().unwrap().count(Counter::UnexpectedError), 3);
}

#[tokio::test]
async fn test_abort_keeps_transcripts_of_answered_attempts() {
    let temp = workspace();
    let mut config = config();
    config.generation.max_fail_limit = 1;
    let client = ScriptedClient::new(|_, call| {
        if call == 1 {
            Reply::Text("not json at all".to_string())
        } else {
            Reply::Fail("timeout".to_string())
        }
    });
    let mut sink = MemorySink::new();

    let summary = run(temp.path(), &config, &client, &mut sink).await;

    assert!(summary.aborted());
    assert_eq!(client.calls(), 2);
    assert_eq!(sink.transcripts.len(), 1);
    assert_eq!(sink.transcripts[0].attempt, 1);
    assert_eq!(sink.transcripts[0].response, "not json at all");
    assert_eq!(
        sink.run_stats.as_ref().unwrap().count(Counter::ErrorResponse),
        1
    );
}

#[tokio::test]
async fn test_unloadable_pipeline_is_skipped() {
    let temp = workspace();
    let mut config = config();
    let mut broken = pipeline();
    broken.target_db_id = "missing_db".to_string();
    config.pipelines.insert(0, broken);
    let client = ScriptedClient::new(|prompt, _| Reply::Text(valid_response(prompt)));
    let mut sink = MemorySink::new();

    let summary = run(temp.path(), &config, &client, &mut sink).await;

    assert_eq!(summary.pipelines_failed, 1);
    assert_eq!(summary.pipelines_processed, 1);
    assert_eq!(summary.batches_accepted, 3);
}

#[tokio::test]
async fn test_filesystem_layout() {
    let temp = workspace();
    let config = config();
    let client = ScriptedClient::new(|prompt, _| Reply::Text(valid_response(prompt)));
    let mut sink = FsOutputSink::create(&config, temp.path()).unwrap();

    run(temp.path(), &config, &client, &mut sink).await;

    let root = sink.root().to_path_buf();
    assert!(root.starts_with(temp.path().join("output").join("scripted-model")));
    let pipeline_dir = root.join("bird_formula_1");

    let records: Value = serde_json::from_str(
        &std::fs::read_to_string(pipeline_dir.join("concert_singer.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(records.as_array().unwrap().len(), 2);

    let per_db: Value = serde_json::from_str(
        &std::fs::read_to_string(pipeline_dir.join("report/stats_per_db.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(per_db["pets_1"]["request"], 1);
    assert_eq!(per_db["concert_singer"]["request"], 2);

    let run_stats: Value =
        serde_json::from_str(&std::fs::read_to_string(root.join("stats.json")).unwrap()).unwrap();
    assert_eq!(run_stats["success_response"], 3);
    assert!(pipeline_dir.join("full/concert_singer.txt").exists());
    assert!(!pipeline_dir.join("report/errors.json").exists());
}
