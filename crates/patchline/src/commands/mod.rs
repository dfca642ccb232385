//! CLI command implementations

pub mod check;
pub mod config;
pub mod update;
pub mod version;

use anyhow::{Context, Result};
use camino::Utf8Path;
use patchline_core::{HierarchicalConfigLoader, RuntimeConfig};

/// Resolve the effective runtime config. `--base-dir` beats every file and
/// environment layer.
pub fn load_config(explicit: Option<&Utf8Path>, base_dir: Option<&Utf8Path>) -> Result<RuntimeConfig> {
    let loader = HierarchicalConfigLoader::new().context("Failed to locate the config directory")?;
    let mut config = loader
        .load_runtime_config_with(explicit)
        .context("Failed to load configuration")?;

    if let Some(dir) = base_dir {
        config.paths.base_dir = dir.to_path_buf();
    }
    Ok(config)
}
