//! Load-order stage
//!
//! The pipeline treats this stage as a pluggable step. The stock
//! implementation edits a mod-manager profile: the payload's entry is moved to
//! the top of `modlist.txt`, and the plugin list shipped inside the payload is
//! placed just in front of an anchor plugin in `plugins.txt` and
//! `loadorder.txt`.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use patchline_core::types::LoadOrderConfig;
use patchline_core::utils::clean_text;
use std::fs;
use std::io;
use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};
use crate::fsutil::write_atomic;

pub const MODLIST_FILE: &str = "modlist.txt";
pub const PLUGINS_FILE: &str = "plugins.txt";
pub const LOADORDER_FILE: &str = "loadorder.txt";

/// Enabled-plugin prefix used by `plugins.txt`
const ENABLED_PREFIX: &str = "*";

/// A step that updates persisted ordering after a payload is installed
#[async_trait]
pub trait LoadOrderUpdater: Send + Sync {
    /// Apply the freshly installed payload at `payload_dir`
    async fn apply(&self, payload_dir: &Utf8Path) -> Result<()>;
}

/// Does nothing. Used when no profile is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLoadOrderUpdater;

#[async_trait]
impl LoadOrderUpdater for NoopLoadOrderUpdater {
    async fn apply(&self, payload_dir: &Utf8Path) -> Result<()> {
        debug!(payload = %payload_dir, "no load-order profile configured");
        Ok(())
    }
}

/// Edits `modlist.txt`, `plugins.txt` and `loadorder.txt` in a profile dir
#[derive(Debug, Clone)]
pub struct ProfileLoadOrderUpdater {
    profile_dir: Utf8PathBuf,
    marker_entry: String,
    list_file: String,
    anchor: String,
}

impl ProfileLoadOrderUpdater {
    pub fn new(profile_dir: impl Into<Utf8PathBuf>, config: &LoadOrderConfig) -> Self {
        Self {
            profile_dir: profile_dir.into(),
            marker_entry: config.marker_entry.clone(),
            list_file: config.list_file.clone(),
            anchor: config.anchor.clone(),
        }
    }

    pub fn profile_dir(&self) -> &Utf8Path {
        &self.profile_dir
    }

    fn apply_blocking(&self, payload_dir: &Utf8Path) -> Result<()> {
        self.update_modlist()?;

        let plugins = self.read_shipped_list(payload_dir)?;
        if plugins.is_empty() {
            info!("payload ships no plugin list, leaving plugin order untouched");
            return Ok(());
        }

        self.update_plugin_file(PLUGINS_FILE, &plugins, ENABLED_PREFIX)?;
        self.update_plugin_file(LOADORDER_FILE, &plugins, "")?;
        info!(plugins = plugins.len(), "load order updated");
        Ok(())
    }

    fn update_modlist(&self) -> Result<()> {
        let path = self.profile_dir.join(MODLIST_FILE);
        let content = read_profile_file(&path)?;
        let updated = promote_modlist_entry(&content, &format!("+{}", self.marker_entry));
        if updated != content {
            write_atomic(&path, updated.as_bytes())?;
        }
        Ok(())
    }

    fn read_shipped_list(&self, payload_dir: &Utf8Path) -> Result<Vec<String>> {
        let path = payload_dir.join(&self.list_file);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(clean_text(&content)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(UpdateError::apply(format!("cannot read {}: {}", path, e))),
        }
    }

    fn update_plugin_file(&self, file: &str, plugins: &[String], prefix: &str) -> Result<()> {
        let path = self.profile_dir.join(file);
        let content = read_profile_file(&path)?;
        let anchor = format!("{}{}", prefix, self.anchor);
        let entries: Vec<String> = plugins.iter().map(|p| format!("{}{}", prefix, p)).collect();

        match insert_before_anchor(&content, &entries, &anchor) {
            Some(updated) => {
                if updated != content {
                    write_atomic(&path, updated.as_bytes())?;
                }
                Ok(())
            }
            None => {
                warn!(file = %path, anchor = %anchor, "anchor plugin not found, order unchanged");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl LoadOrderUpdater for ProfileLoadOrderUpdater {
    async fn apply(&self, payload_dir: &Utf8Path) -> Result<()> {
        let updater = self.clone();
        let payload_dir = payload_dir.to_path_buf();
        tokio::task::spawn_blocking(move || updater.apply_blocking(&payload_dir))
            .await
            .map_err(|e| UpdateError::internal(format!("load order task failed: {}", e)))?
    }
}

fn read_profile_file(path: &Utf8Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| UpdateError::apply(format!("cannot read {}: {}", path, e)))
}

/// Move `entry` to the first line of a mod list, dropping other copies
pub fn promote_modlist_entry(content: &str, entry: &str) -> String {
    let mut lines = vec![entry];
    lines.extend(content.lines().filter(|line| line.trim_end() != entry));
    let mut updated = lines.join("\n");
    updated.push('\n');
    updated
}

/// Place `entries` directly before the `anchor` line, removing earlier
/// occurrences of them. `None` if the anchor line is absent.
pub fn insert_before_anchor(content: &str, entries: &[String], anchor: &str) -> Option<String> {
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| !entries.iter().any(|e| e == line.trim_end()))
        .collect();

    let position = kept.iter().position(|line| line.trim_end() == anchor)?;

    let mut lines: Vec<&str> = Vec::with_capacity(kept.len() + entries.len());
    lines.extend_from_slice(&kept[..position]);
    lines.extend(entries.iter().map(String::as_str));
    lines.extend_from_slice(&kept[position..]);

    let mut updated = lines.join("\n");
    updated.push('\n');
    Some(updated)
}
