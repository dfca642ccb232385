//! Hierarchical configuration loader with precedence
//!
//! Loads configuration from multiple sources with the following precedence (low to high):
//! 1. Embedded defaults (built into binary)
//! 2. Global config (~/.patchline/patchline.yaml)
//! 3. An explicit config file (the CLI's `--config`)
//! 4. Environment variables (PATCHLINE_* prefix)
//!
//! Layers are merged as YAML documents before deserializing, so a file that
//! sets a single key leaves every other key at the value of the layer below.

use crate::error::{Error, Result};
use crate::types::{RuntimeConfig, OP_DOWNLOAD, OP_UNPACK};
use crate::utils::get_home_dir;
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde_yaml_ng::{Mapping, Value};
use std::env;
use std::fs;
use tracing::debug;

/// File name of the user-level runtime config
pub const RUNTIME_CONFIG_FILE: &str = "patchline.yaml";

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a loader rooted at ~/.patchline
    pub fn new() -> Result<Self> {
        let config_dir = get_home_dir()?.join(".patchline");
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Load runtime configuration with hierarchical precedence
    pub fn load_runtime_config(&self) -> Result<RuntimeConfig> {
        self.load_runtime_config_with(None)
    }

    /// Load runtime configuration, layering `explicit` above the global file
    pub fn load_runtime_config_with(&self, explicit: Option<&Utf8Path>) -> Result<RuntimeConfig> {
        let mut merged = Self::load_embedded_value("runtime-defaults.yaml")?;

        let global_path = self.config_dir.join(RUNTIME_CONFIG_FILE);
        if global_path.exists() {
            debug!(path = %global_path, "loading global runtime config");
            merge_values(&mut merged, Self::load_yaml_value(&global_path)?);
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::config_not_found(path.as_str()));
            }
            debug!(path = %path, "loading explicit runtime config");
            merge_values(&mut merged, Self::load_yaml_value(path)?);
        }

        let config: RuntimeConfig = serde_yaml_ng::from_value(merged)
            .map_err(|e| Error::invalid_config(format!("Failed to parse runtime config: {}", e)))?;

        self.apply_env_overrides(config)
    }

    /// Load an embedded configuration file as a YAML value
    fn load_embedded_value(filename: &str) -> Result<Value> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    /// Load a YAML file and parse it into a value
    fn load_yaml_file_value(path: &Utf8Path) -> Result<Value> {
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    fn load_yaml_value(path: &Utf8Path) -> Result<Value> {
        match Self::load_yaml_file_value(path)? {
            // An empty file parses as null
            Value::Null => Ok(Value::Mapping(Mapping::new())),
            value => Ok(value),
        }
    }

    /// Apply environment variable overrides to runtime config
    fn apply_env_overrides(&self, mut config: RuntimeConfig) -> Result<RuntimeConfig> {
        if let Some(val) = env_number("PATCHLINE_CONNECT_TIMEOUT_SECS")? {
            config.network.connect_timeout_secs = val;
        }
        if let Some(val) = env_number("PATCHLINE_READ_TIMEOUT_SECS")? {
            config.network.read_timeout_secs = val;
        }
        if let Some(val) = env_number("PATCHLINE_HTTP_TIMEOUT_SECS")? {
            config.network.http_timeout_secs = val;
        }

        if let Some(val) = env_number("PATCHLINE_DOWNLOAD_ATTEMPTS")? {
            let mut policy = config.policy_for(OP_DOWNLOAD);
            policy.max_attempts = val as u32;
            config
                .retry_policies
                .operations
                .insert(OP_DOWNLOAD.to_string(), policy);
        }
        if let Some(val) = env_number("PATCHLINE_UNPACK_ATTEMPTS")? {
            let mut policy = config.policy_for(OP_UNPACK);
            policy.max_attempts = val as u32;
            config
                .retry_policies
                .operations
                .insert(OP_UNPACK.to_string(), policy);
        }

        if let Ok(val) = env::var("PATCHLINE_BASE_DIR") {
            config.paths.base_dir = Utf8PathBuf::from(val);
        }
        if let Ok(val) = env::var("PATCHLINE_INSTALL_DIR") {
            config.paths.install_dir = Utf8PathBuf::from(val);
        }

        if let Ok(val) = env::var("PATCHLINE_VERSION_URL") {
            config.source.version_url = Some(val);
        }
        if let Ok(val) = env::var("PATCHLINE_ARCHIVE_URL") {
            config.source.archive_url = Some(val);
        }
        if let Ok(val) = env::var("PATCHLINE_CHECKSUM_URL") {
            config.source.checksum_url = Some(val);
        }

        if let Ok(val) = env::var("PATCHLINE_PROFILE_DIR") {
            config.load_order.profile_dir = Some(Utf8PathBuf::from(val));
        }

        Ok(config)
    }
}

fn env_number(key: &str) -> Result<Option<u64>> {
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} must be a valid number", key))),
        Err(_) => Ok(None),
    }
}

/// Recursively merge `overlay` into `base`. Mappings merge key by key; any
/// other value in the overlay replaces the base value.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
