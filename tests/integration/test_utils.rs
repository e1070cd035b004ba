//! Shared test utilities for integration tests
//!
//! Isolated XDG directories, an on-disk dataset fixture and a provider double whose
//! replies are chosen by a closure over the prompt.

use async_trait::async_trait;
use qmap::config::{PipelineConfig, QmapConfig};
use qmap::error::ApiError;
use qmap::provider::{FinishReason, GenerationClient, GenerationOutput};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

/// Global mutex to serialize XDG environment variable access across all tests
static XDG_ENV_MUTEX: Mutex<()> = Mutex::new(());

struct EnvState {
    home: Option<String>,
    xdg_config_home: Option<String>,
}

impl EnvState {
    fn capture() -> Self {
        Self {
            home: std::env::var("HOME").ok(),
            xdg_config_home: std::env::var("XDG_CONFIG_HOME").ok(),
        }
    }

    fn restore(self) {
        match self.home {
            Some(orig) => std::env::set_var("HOME", orig),
            None => std::env::remove_var("HOME"),
        }
        match self.xdg_config_home {
            Some(orig) => std::env::set_var("XDG_CONFIG_HOME", orig),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
}

/// Run `f` with `XDG_CONFIG_HOME` and `HOME` pointed into `test_dir`.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = XDG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let env_state = EnvState::capture();

    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_home).unwrap();
    std::env::set_var("HOME", test_home.to_str().unwrap());
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path().to_str().unwrap());

    let result = f();
    env_state.restore();
    result
}

fn write(path: &Path, value: &Value) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Two source databases (`concert_singer` with 3 questions, `pets_1` with 1) mapped
/// onto `formula_1`.
pub fn write_dataset(root: &Path) {
    write(
        &root.join("datasets/spider/schemas.json"),
        &json!({
            "concert_singer": "CREATE TABLE singer (singer_id INT, name TEXT)",
            "pets_1": "CREATE TABLE pets (pet_id INT, pet_type TEXT)"
        }),
    );
    write(
        &root.join("datasets/bird/schemas.json"),
        &json!({"formula_1": "CREATE TABLE races (raceId INT, name TEXT)"}),
    );
    write(
        &root.join("datasets/bird/target_samples/sample_formula_1.json"),
        &json!({"races": [{"raceId": 1, "name": "Australian Grand Prix"}]}),
    );
    write(
        &root.join("datasets/spider/questions/concert_singer.json"),
        &json!([
            {"db_id": "concert_singer", "question": "How many singers are there?", "query": "SELECT count(*) FROM singer"},
            {"db_id": "concert_singer", "question": "List singer names.", "query": "SELECT name FROM singer"},
            {"db_id": "concert_singer", "question": "Oldest singer?", "query": "SELECT name FROM singer ORDER BY age DESC LIMIT 1"}
        ]),
    );
    write(
        &root.join("datasets/spider/questions/pets_1.json"),
        &json!([
            {"db_id": "pets_1", "question": "How many pets?", "query": "SELECT count(*) FROM pets"}
        ]),
    );
}

pub fn write_prompts(root: &Path) {
    let dir = root.join("prompts");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("base_prompt.txt"),
        "Translate each source question and query to the target database.",
    )
    .unwrap();
}

pub fn pipeline() -> PipelineConfig {
    PipelineConfig {
        source_dataset: PathBuf::from("datasets/spider"),
        target_dataset: PathBuf::from("datasets/bird"),
        source_db_ids: vec![],
        target_db_id: "formula_1".to_string(),
        source_questions_shuffle_seed: -1,
        source_questions_limit: -1,
    }
}

/// Config with one pipeline, two questions per prompt and no backoff sleep.
pub fn config() -> QmapConfig {
    let mut config = QmapConfig::default();
    config.model.model = "scripted-model".to_string();
    config.generation.max_questions_per_prompt = 2;
    config.generation.retry_backoff_secs = 0.0;
    config.pipelines.push(pipeline());
    config
}

/// Source database named in the prompt's source schema block
pub fn source_of(prompt: &str) -> &'static str {
    if prompt.contains("\"db_id\": \"pets_1\"") {
        "pets_1"
    } else {
        "concert_singer"
    }
}

pub fn record(source: &str, target: &str) -> Value {
    json!({
        "source_db_id": source,
        "source_question": "How many?",
        "source_query": "SELECT count(*) FROM t",
        "target_db_id": target,
        "target_question": "How many races?",
        "target_query": "SELECT count(*) FROM races"
    })
}

/// A valid one-record response for whichever source the prompt is about
pub fn valid_response(prompt: &str) -> String {
    format!(
        "```json\n{}\n```",
        serde_json::to_string_pretty(&json!([record(source_of(prompt), "formula_1")])).unwrap()
    )
}

pub enum Reply {
    Text(String),
    Fail(String),
}

type Responder = Box<dyn Fn(&str, usize) -> Reply + Send + Sync>;

/// Provider double: `respond(prompt, call_number)` picks each reply.
pub struct ScriptedClient {
    respond: Responder,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(respond: impl Fn(&str, usize) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate(
        &self,
        prompt: &str,
        _system_instruction: &str,
    ) -> Result<GenerationOutput, ApiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match (self.respond)(prompt, call) {
            Reply::Text(response) => Ok(GenerationOutput {
                response,
                prompt_token_count: Some(100),
                response_token_count: Some(20),
                time_taken: 0.5,
                finish_reason: FinishReason::None,
            }),
            Reply::Fail(message) => Err(ApiError::ProviderRequestFailed(message)),
        }
    }

    async fn count_tokens(&self, text: &str) -> Result<u64, ApiError> {
        Ok(text.split_whitespace().count() as u64)
    }

    async fn token_limit(&self) -> Result<u64, ApiError> {
        Ok(8_192)
    }

    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        Ok(vec!["scripted-model".to_string()])
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }

    fn uses_system_instruction(&self) -> bool {
        false
    }
}
