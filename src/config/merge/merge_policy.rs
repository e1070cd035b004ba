//! Merge rules: defaults, override order, environment overrides.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("model.origin", "openai")?
        .set_default("generation.max_attempts_per_prompt", 3)?
        .set_default("generation.max_fail_limit", 5)?
        .set_default("generation.max_questions_per_prompt", 10)
}

/// Environment overrides win over every file, e.g. `QMAP_GENERATION__MAX_FAIL_LIMIT=2`.
pub fn with_environment(
    builder: ConfigBuilder<DefaultState>,
) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("QMAP")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}
