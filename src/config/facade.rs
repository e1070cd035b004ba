//! Config loading facade: the only entry point callers use to build a [`QmapConfig`].

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::QmapConfig;
use crate::error::ApiError;
use config::File;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): built-in defaults, global config file,
    /// `config/config.toml`, `config/{QMAP_ENV}.toml`, `QMAP_*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<QmapConfig, ApiError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = merge_policy::with_environment(builder);

        let config: QmapConfig = builder.build()?.try_deserialize()?;
        debug!(
            workspace = %workspace_root.display(),
            pipelines = config.pipelines.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from one explicit file (replaces the file layers).
    pub fn load_from_file(path: &Path) -> Result<QmapConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let builder = merge_policy::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()).required(true));
        let builder = merge_policy::with_environment(builder);
        Ok(builder.build()?.try_deserialize()?)
    }

    /// Path of the user-level configuration file, if a home directory is known.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
