//! Integration tests for configuration loading and validation

use crate::integration::test_utils::with_xdg_env;
use qmap::config::{ConfigLoader, ModelOrigin, ValidationError};
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[model]
origin = "google"
model = "gemini-1.5-pro"
temperature = 0.2

[generation]
max_attempts_per_prompt = 4
max_questions_per_prompt = 5
fields_to_check = ["source_db_id", "target_db_id", "target_query"]

[generation.validation]
db_id_matching = false

[[pipelines]]
source_dataset = "datasets/spider"
target_dataset = "datasets/bird"
source_db_ids = ["concert_singer"]
target_db_id = "formula_1"
source_questions_shuffle_seed = 7
source_questions_limit = 20

[[pipelines]]
source_dataset = "datasets/spider"
target_dataset = "datasets/bird"
target_db_id = "california_schools"
"#;

#[test]
fn test_load_full_config_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("qmap.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    assert!(config.validate().is_ok());

    assert_eq!(config.model.origin, ModelOrigin::Google);
    assert_eq!(config.model.model, "gemini-1.5-pro");
    assert_eq!(config.generation.max_attempts_per_prompt, 4);
    assert_eq!(config.generation.max_fail_limit, 5);
    assert!(config.generation.validation.fields_checking);
    assert!(!config.generation.validation.db_id_matching);

    assert_eq!(config.pipelines.len(), 2);
    assert_eq!(config.pipelines[0].name(), "bird_formula_1");
    assert_eq!(config.pipelines[0].source_questions_shuffle_seed, 7);
    assert!(config.pipelines[1].source_db_ids.is_empty());
    assert_eq!(config.pipelines[1].source_questions_limit, -1);
}

#[test]
fn test_validation_collects_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("qmap.toml");
    std::fs::write(
        &path,
        r#"
[generation]
max_attempts_per_prompt = 0
max_questions_per_prompt = 0

[[pipelines]]
source_dataset = "datasets/spider"
target_dataset = "datasets/bird"
target_db_id = ""
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    let problems = config.validate().unwrap_err();
    assert!(problems.contains(&ValidationError::Model("Model name is required".to_string())));
    assert!(problems.iter().any(|p| matches!(p, ValidationError::Pipeline(0, _))));
    assert_eq!(
        problems
            .iter()
            .filter(|p| matches!(p, ValidationError::Generation(_)))
            .count(),
        2
    );
}

#[test]
fn test_workspace_file_overrides_global_file() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        let global = test_dir.path().join("qmap");
        std::fs::create_dir_all(&global).unwrap();
        std::fs::write(
            global.join("config.toml"),
            "[model]\nmodel = \"global-model\"\n\n[generation]\nmax_fail_limit = 9\n",
        )
        .unwrap();

        let workspace = TempDir::new().unwrap();
        std::fs::create_dir_all(workspace.path().join("config")).unwrap();
        std::fs::write(
            workspace.path().join("config/config.toml"),
            "[model]\nmodel = \"workspace-model\"\n",
        )
        .unwrap();

        let config = ConfigLoader::load(workspace.path()).unwrap();
        assert_eq!(config.model.model, "workspace-model");
        assert_eq!(config.generation.max_fail_limit, 9);
    });
}

#[test]
fn test_redacted_config_hides_api_key() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("qmap.toml");
    std::fs::write(&path, "[model]\nmodel = \"gpt-4o\"\napi_key = \"sk-secret\"\n").unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    let rendered = toml::to_string(&config.redacted()).unwrap();
    assert!(!rendered.contains("sk-secret"));
    assert!(rendered.contains("<redacted>"));
}
