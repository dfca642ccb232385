//! Version markers and the store that reads, fetches and commits them

use camino::{Utf8Path, Utf8PathBuf};
use patchline_core::types::PathsConfig;
use patchline_core::utils::clean_text;
use semver::Version;
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io;
use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};
use crate::fsutil::write_atomic;
use crate::source::UpdateSource;

/// Token written when nothing is installed
pub const NO_VERSION_TOKEN: &str = "NO_PATCH";

/// An installed or published version
///
/// `Unknown` sorts before every known version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionMarker {
    Unknown,
    Known(Version),
}

impl VersionMarker {
    /// Parse a version token
    ///
    /// Surrounding whitespace and a byte-order mark are ignored, a leading
    /// `v` is accepted, and `MAJOR.MINOR` is read as `MAJOR.MINOR.0`. An empty
    /// token and `NO_PATCH` are `Unknown`.
    pub fn parse(token: &str) -> Result<Self> {
        let cleaned = clean_text(token);
        if cleaned.is_empty() || cleaned == NO_VERSION_TOKEN {
            return Ok(VersionMarker::Unknown);
        }

        let bare = cleaned
            .strip_prefix('v')
            .or_else(|| cleaned.strip_prefix('V'))
            .unwrap_or(cleaned);

        let padded;
        let candidate = if bare.split('.').count() == 2 && !bare.contains(&['-', '+'][..]) {
            padded = format!("{}.0", bare);
            padded.as_str()
        } else {
            bare
        };

        Version::parse(candidate)
            .map(VersionMarker::Known)
            .map_err(|e| UpdateError::format("version token", cleaned, e.to_string()))
    }

    pub fn as_version(&self) -> Option<&Version> {
        match self {
            VersionMarker::Known(v) => Some(v),
            VersionMarker::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, VersionMarker::Unknown)
    }
}

impl Ord for VersionMarker {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VersionMarker::Unknown, VersionMarker::Unknown) => Ordering::Equal,
            (VersionMarker::Unknown, VersionMarker::Known(_)) => Ordering::Less,
            (VersionMarker::Known(_), VersionMarker::Unknown) => Ordering::Greater,
            (VersionMarker::Known(a), VersionMarker::Known(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for VersionMarker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionMarker::Unknown => f.write_str(NO_VERSION_TOKEN),
            VersionMarker::Known(v) => write!(f, "{}", v),
        }
    }
}

impl From<Version> for VersionMarker {
    fn from(version: Version) -> Self {
        VersionMarker::Known(version)
    }
}

/// True when `remote` is strictly newer than `local`
pub fn is_update_available(local: &VersionMarker, remote: &VersionMarker) -> bool {
    remote > local
}

/// Local and remote version markers on disk
#[derive(Debug, Clone)]
pub struct VersionStore {
    local_path: Utf8PathBuf,
    remote_path: Utf8PathBuf,
}

impl VersionStore {
    pub fn new(local_path: impl Into<Utf8PathBuf>, remote_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(paths.local_version_file(), paths.remote_version_file())
    }

    pub fn local_path(&self) -> &Utf8Path {
        &self.local_path
    }

    pub fn remote_path(&self) -> &Utf8Path {
        &self.remote_path
    }

    /// Installed version. A missing file is a first run and reads as
    /// `Unknown`, as does a marker that no longer parses.
    pub fn read_local_version(&self) -> Result<VersionMarker> {
        let content = match fs::read_to_string(&self.local_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.local_path, "no local version marker");
                return Ok(VersionMarker::Unknown);
            }
            Err(e) => return Err(UpdateError::from_io(&self.local_path, e)),
        };

        match VersionMarker::parse(&content) {
            Ok(marker) => Ok(marker),
            Err(e) => {
                warn!(path = %self.local_path, error = %e, "ignoring unreadable local version marker");
                Ok(VersionMarker::Unknown)
            }
        }
    }

    /// Latest published version
    ///
    /// The raw token is recorded in the remote marker file before it is
    /// validated. A token that does not name a concrete version is a
    /// `FormatError`.
    pub async fn fetch_remote_version(&self, source: &dyn UpdateSource) -> Result<Version> {
        let token = source.fetch_version_token().await?;
        write_atomic(&self.remote_path, clean_text(&token).as_bytes())?;

        match VersionMarker::parse(&token)? {
            VersionMarker::Known(version) => {
                debug!(version = %version, "fetched remote version");
                Ok(version)
            }
            VersionMarker::Unknown => Err(UpdateError::format(
                "version token",
                clean_text(&token),
                "remote feed did not publish a version",
            )),
        }
    }

    /// Atomically record `version` as installed
    pub fn commit_local_version(&self, version: &Version) -> Result<()> {
        write_atomic(&self.local_path, version.to_string().as_bytes())?;
        info!(version = %version, path = %self.local_path, "committed local version");
        Ok(())
    }
}
