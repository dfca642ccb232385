//! Utility functions for patchline-core

use crate::error::{Error, Result};
use camino::Utf8PathBuf;

/// Get the user's home directory
///
/// Falls back to `HOME` / `USERPROFILE` when the platform lookup fails.
pub fn get_home_dir() -> Result<Utf8PathBuf> {
    let home = dirs::home_dir()
        .or_else(|| std::env::var_os("HOME").map(Into::into))
        .or_else(|| std::env::var_os("USERPROFILE").map(Into::into))
        .ok_or_else(|| Error::invalid_config("Could not determine home directory"))?;

    Utf8PathBuf::from_path_buf(home)
        .map_err(|p| Error::invalid_config(format!("Home directory is not UTF-8: {}", p.display())))
}

/// Strip a UTF-8 byte order mark and surrounding whitespace from text read
/// off disk or the network.
pub fn clean_text(raw: &str) -> &str {
    raw.trim().trim_start_matches('\u{FEFF}').trim()
}
