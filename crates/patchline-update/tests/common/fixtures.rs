//! Temporary install environments

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use patchline_core::types::{RetryPolicy, RetryStrategy, RuntimeConfig, OP_DOWNLOAD, OP_UNPACK, OP_VERSION_CHECK};
use std::fs;
use tempfile::TempDir;
use wiremock::MockServer;

use super::constants::*;

/// Retry policy without delays
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        strategy: RetryStrategy::None,
        backoff_multiplier: 1.0,
        initial_delay_ms: 0,
        max_delay_ms: 0,
    }
}

/// An install root in a temp directory
pub struct TestEnv {
    _dir: TempDir,
    pub root: Utf8PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, root }
    }

    /// Runtime config pointed at `server`
    pub fn config(&self, server: &MockServer) -> RuntimeConfig {
        let mut config = self.config_offline();
        config.source.version_url = Some(format!("{}{}", server.uri(), VERSION_PATH));
        config.source.archive_url = Some(format!("{}{}", server.uri(), ARCHIVE_PATH));
        config
    }

    /// Runtime config rooted here with fast retry policies and no feed
    pub fn config_offline(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.paths.base_dir = self.root.clone();
        config.progress.emit_interval_ms = 0;

        let policies = &mut config.retry_policies;
        policies.default = fast_policy(1);
        policies.operations.insert(OP_VERSION_CHECK.to_string(), fast_policy(1));
        policies.operations.insert(OP_DOWNLOAD.to_string(), fast_policy(2));
        policies.operations.insert(OP_UNPACK.to_string(), fast_policy(3));
        config
    }

    /// Config that also runs the profile load-order stage
    pub fn config_with_profile(&self, server: &MockServer) -> RuntimeConfig {
        let mut config = self.config(server);
        config.load_order.profile_dir = Some(self.profile_dir());
        config
    }

    pub fn install_dir(&self) -> Utf8PathBuf {
        self.root.join("payload")
    }

    pub fn archive_path(&self) -> Utf8PathBuf {
        self.root.join("update.zip")
    }

    pub fn profile_dir(&self) -> Utf8PathBuf {
        self.root.join("profile")
    }

    pub fn write_local_version(&self, version: &str) {
        fs::write(self.root.join("version.txt"), version).unwrap();
    }

    pub fn local_version(&self) -> Option<String> {
        fs::read_to_string(self.root.join("version.txt")).ok()
    }

    pub fn remote_version(&self) -> Option<String> {
        fs::read_to_string(self.root.join("remote_version.txt")).ok()
    }

    /// An existing install holding the old payload
    pub fn seed_install(&self) {
        let install = self.install_dir();
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join(OLD_PAYLOAD_FILE), OLD_PAYLOAD_CONTENT).unwrap();
    }

    /// A mod-manager profile with the anchor plugin in both lists
    pub fn seed_profile(&self) {
        let profile = self.profile_dir();
        fs::create_dir_all(&profile).unwrap();
        fs::write(profile.join("modlist.txt"), "+Other Mod\n+PATCH\n").unwrap();
        fs::write(
            profile.join("plugins.txt"),
            format!("*Skyrim.esm\n*{}\n*Late.esp\n", ANCHOR_PLUGIN),
        )
        .unwrap();
        fs::write(
            profile.join("loadorder.txt"),
            format!("Skyrim.esm\n{}\nLate.esp\n", ANCHOR_PLUGIN),
        )
        .unwrap();
    }

    pub fn read(&self, relative: impl AsRef<Utf8Path>) -> String {
        fs::read_to_string(self.root.join(relative)).unwrap()
    }

    /// Names of leftover staging or backup directories next to the install
    pub fn leftovers(&self) -> Vec<String> {
        fs::read_dir(&self.root)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".payload.staging-") || name == "payload.previous")
            .collect()
    }
}
