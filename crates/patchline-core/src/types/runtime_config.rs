//! Runtime configuration types for the update pipeline
//!
//! These types define configuration that controls runtime behavior like
//! network timeouts, retry policies, file locations and progress pacing.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Operation key for archive download retries
pub const OP_DOWNLOAD: &str = "download";

/// Operation key for fetching the remote version token
pub const OP_VERSION_CHECK: &str = "version-check";

/// Operation key for unpack attempts (each retry re-downloads the archive)
pub const OP_UNPACK: &str = "unpack";

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Network and HTTP configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Retry policy configurations
    #[serde(default)]
    pub retry_policies: RetryPoliciesConfig,

    /// Local file locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Where updates come from
    #[serde(default)]
    pub source: SourceConfig,

    /// Progress event pacing
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Archive extraction settings
    #[serde(default)]
    pub unpack: UnpackConfig,

    /// Load-order stage settings
    #[serde(default)]
    pub load_order: LoadOrderConfig,
}

impl RuntimeConfig {
    /// Retry policy for an operation, falling back to the default policy
    pub fn policy_for(&self, operation: &str) -> RetryPolicy {
        self.retry_policies
            .operations
            .get(operation)
            .cloned()
            .unwrap_or_else(|| self.retry_policies.default.clone())
    }
}

/// Network and HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// TCP/TLS connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Maximum time without receiving a byte before a read is abandoned
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Overall timeout for small requests (version and checksum fetches)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// User agent string for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            http_timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    15
}
fn default_read_timeout() -> u64 {
    30
}
fn default_http_timeout() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!(
        "patchline/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Retry policy configurations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPoliciesConfig {
    /// Default retry policy
    #[serde(default)]
    pub default: RetryPolicy,

    /// Per-operation retry policies
    #[serde(default)]
    pub operations: HashMap<String, RetryPolicy>,
}

impl Default for RetryPoliciesConfig {
    fn default() -> Self {
        let mut operations = HashMap::new();

        operations.insert(
            OP_VERSION_CHECK.to_string(),
            RetryPolicy {
                max_attempts: 2,
                strategy: RetryStrategy::FixedDelay,
                backoff_multiplier: 1.0,
                initial_delay_ms: 1000,
                max_delay_ms: 5000,
            },
        );

        operations.insert(
            OP_DOWNLOAD.to_string(),
            RetryPolicy {
                max_attempts: 3,
                strategy: RetryStrategy::ExponentialBackoff,
                backoff_multiplier: 2.0,
                initial_delay_ms: 1000,
                max_delay_ms: 30000,
            },
        );

        // First unpack plus two re-downloads of a corrupt archive
        operations.insert(
            OP_UNPACK.to_string(),
            RetryPolicy {
                max_attempts: 3,
                strategy: RetryStrategy::FixedDelay,
                backoff_multiplier: 1.0,
                initial_delay_ms: 500,
                max_delay_ms: 5000,
            },
        );

        Self {
            default: RetryPolicy::default(),
            operations,
        }
    }
}

/// Retry policy for an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Retry strategy
    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Backoff multiplier for exponential strategies
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: RetryStrategy::default(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}

/// Retry strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    /// No delay between attempts
    None,

    /// Fixed delay between retries
    FixedDelay,

    /// Exponential backoff (default)
    #[default]
    ExponentialBackoff,

    /// Linear backoff
    LinearBackoff,
}

/// Local file locations
///
/// Relative paths are resolved against `base-dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathsConfig {
    /// Directory that relative paths are resolved against
    #[serde(default = "default_base_dir")]
    pub base_dir: Utf8PathBuf,

    /// Directory the update payload is installed into
    #[serde(default = "default_install_dir")]
    pub install_dir: Utf8PathBuf,

    /// Marker recording the installed version
    #[serde(default = "default_local_version_file")]
    pub local_version_file: Utf8PathBuf,

    /// Marker recording the latest fetched remote version
    #[serde(default = "default_remote_version_file")]
    pub remote_version_file: Utf8PathBuf,

    /// Download target for the update archive
    #[serde(default = "default_archive_file")]
    pub archive_file: Utf8PathBuf,
}

impl PathsConfig {
    /// Resolve a configured path against the base directory
    pub fn resolve(&self, path: &Utf8PathBuf) -> Utf8PathBuf {
        if path.is_absolute() {
            path.clone()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn install_dir(&self) -> Utf8PathBuf {
        self.resolve(&self.install_dir)
    }

    pub fn local_version_file(&self) -> Utf8PathBuf {
        self.resolve(&self.local_version_file)
    }

    pub fn remote_version_file(&self) -> Utf8PathBuf {
        self.resolve(&self.remote_version_file)
    }

    pub fn archive_file(&self) -> Utf8PathBuf {
        self.resolve(&self.archive_file)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            install_dir: default_install_dir(),
            local_version_file: default_local_version_file(),
            remote_version_file: default_remote_version_file(),
            archive_file: default_archive_file(),
        }
    }
}

fn default_base_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(".")
}
fn default_install_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("payload")
}
fn default_local_version_file() -> Utf8PathBuf {
    Utf8PathBuf::from("version.txt")
}
fn default_remote_version_file() -> Utf8PathBuf {
    Utf8PathBuf::from("remote_version.txt")
}
fn default_archive_file() -> Utf8PathBuf {
    Utf8PathBuf::from("update.zip")
}

/// Update source endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// URL returning the latest version token as plain text
    #[serde(default)]
    pub version_url: Option<String>,

    /// URL of the update archive
    #[serde(default)]
    pub archive_url: Option<String>,

    /// URL returning the archive's hex SHA-256 (optional)
    #[serde(default)]
    pub checksum_url: Option<String>,
}

/// Progress event pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProgressConfig {
    /// Minimum interval between two progress events of the same kind
    #[serde(default = "default_emit_interval")]
    pub emit_interval_ms: u64,

    /// Width of the sliding window used for transfer speed
    #[serde(default = "default_speed_window")]
    pub speed_window_ms: u64,

    /// Capacity of the event channel; senders wait when it is full
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl ProgressConfig {
    pub fn emit_interval(&self) -> Duration {
        Duration::from_millis(self.emit_interval_ms)
    }

    pub fn speed_window(&self) -> Duration {
        Duration::from_millis(self.speed_window_ms)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            emit_interval_ms: default_emit_interval(),
            speed_window_ms: default_speed_window(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_emit_interval() -> u64 {
    100
}
fn default_speed_window() -> u64 {
    3000
}
fn default_channel_capacity() -> usize {
    256
}

/// Archive extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnpackConfig {
    /// Maximum time spent writing a single archive entry
    #[serde(default = "default_entry_timeout")]
    pub entry_timeout_secs: u64,
}

impl UnpackConfig {
    pub fn entry_timeout(&self) -> Duration {
        Duration::from_secs(self.entry_timeout_secs)
    }
}

impl Default for UnpackConfig {
    fn default() -> Self {
        Self {
            entry_timeout_secs: default_entry_timeout(),
        }
    }
}

fn default_entry_timeout() -> u64 {
    120
}

/// Load-order stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadOrderConfig {
    /// Profile directory holding modlist.txt, plugins.txt and loadorder.txt.
    /// The stage is skipped when unset.
    #[serde(default)]
    pub profile_dir: Option<Utf8PathBuf>,

    /// Entry that must head modlist.txt (without the leading `+`)
    #[serde(default = "default_marker_entry")]
    pub marker_entry: String,

    /// File inside the installed payload listing plugins in order
    #[serde(default = "default_list_file")]
    pub list_file: String,

    /// Plugin the shipped list is inserted in front of
    #[serde(default = "default_anchor")]
    pub anchor: String,
}

impl Default for LoadOrderConfig {
    fn default() -> Self {
        Self {
            profile_dir: None,
            marker_entry: default_marker_entry(),
            list_file: default_list_file(),
            anchor: default_anchor(),
        }
    }
}

fn default_marker_entry() -> String {
    "PATCH".to_string()
}
fn default_list_file() -> String {
    "load_order.txt".to_string()
}
fn default_anchor() -> String {
    "Requiem for the Indifferent.esp".to_string()
}
