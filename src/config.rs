//! Configuration types for ipatool-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Structured output format requested from the wrapped tool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// Machine-readable JSON log lines (default)
    #[default]
    Json,
}

impl OutputFormat {
    /// The value passed to the tool's `--format` flag
    pub fn as_flag(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        }
    }
}

/// Wrapped tool invocation settings (binary location, global flags)
///
/// Groups settings that shape every subprocess invocation.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Path to the ipatool executable (auto-detected if None)
    #[serde(default)]
    pub tool_path: Option<PathBuf>,

    /// Whether to search PATH for the binary if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Output format requested from the tool (default: json)
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Pass `--non-interactive` so the tool never prompts (default: true)
    #[serde(default = "default_true")]
    pub non_interactive: bool,

    /// Pass `--verbose` for diagnostic tool output (default: false)
    #[serde(default)]
    pub verbose: bool,

    /// Keychain passphrase forwarded to the tool; blank values are not forwarded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keychain_passphrase: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tool_path: None,
            search_path: true,
            output_format: OutputFormat::default(),
            non_interactive: true,
            verbose: false,
            keychain_passphrase: None,
        }
    }
}

/// Ownership verification settings (concurrency, retry cadence, budgets)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Maximum concurrent verification subprocesses (default: 4, clamped to ≥ 1)
    #[serde(default = "default_verify_concurrent")]
    pub max_concurrent: usize,

    /// Attempts per probe before moving on (default: 2)
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,

    /// Delay between attempts of the same probe in milliseconds (default: 400)
    #[serde(default = "default_probe_retry_delay", with = "duration_ms_serde")]
    pub probe_retry_delay: Duration,

    /// Delay before re-running the full probe list in milliseconds (default: 2000)
    #[serde(default = "default_recheck_delay", with = "duration_ms_serde")]
    pub recheck_delay: Duration,

    /// Full probe-list passes before giving up on a key (default: 3)
    #[serde(default = "default_recheck_budget")]
    pub recheck_budget: u32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_verify_concurrent(),
            probe_attempts: default_probe_attempts(),
            probe_retry_delay: default_probe_retry_delay(),
            recheck_delay: default_recheck_delay(),
            recheck_budget: default_recheck_budget(),
        }
    }
}

/// Download progress polling settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Poll interval for on-disk file size in milliseconds (default: 500)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub poll_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

/// Download output settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory where packages are written when no explicit output path is
    /// given (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub output_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_download_dir(),
        }
    }
}

/// Store catalog lookup settings (artwork and size hints)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Lookup endpoint URL (default: the public iTunes lookup API)
    #[serde(default = "default_lookup_endpoint")]
    pub endpoint: String,

    /// Two-letter storefront country code (default: "us")
    #[serde(default = "default_country")]
    pub country: String,

    /// Maximum ids per lookup request (default: 50)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            endpoint: default_lookup_endpoint(),
            country: default_country(),
            batch_size: default_batch_size(),
        }
    }
}

/// Main configuration for [`IpatoolClient`](crate::IpatoolClient)
///
/// Fields are organized into logical sub-configs:
/// - [`tool`](ToolConfig): binary location and global flags
/// - [`verify`](VerifyConfig): ownership verification cadence and budgets
/// - [`progress`](ProgressConfig): download progress polling
/// - [`download`](DownloadConfig): output directory
/// - [`lookup`](LookupConfig): store catalog lookups
///
/// All sub-config fields are flattened for backward-compatible serialization,
/// meaning the JSON/TOML format remains flat (no nesting).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tool invocation settings
    #[serde(flatten)]
    pub tool: ToolConfig,

    /// Ownership verification settings
    #[serde(flatten)]
    pub verify: VerifyConfig,

    /// Progress polling settings
    #[serde(flatten)]
    pub progress: ProgressConfig,

    /// Download output settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Store catalog lookup settings
    #[serde(flatten)]
    pub lookup: LookupConfig,
}

fn default_true() -> bool {
    true
}

fn default_verify_concurrent() -> usize {
    4
}

fn default_probe_attempts() -> u32 {
    2
}

fn default_probe_retry_delay() -> Duration {
    Duration::from_millis(400)
}

fn default_recheck_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_recheck_budget() -> u32 {
    3
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_lookup_endpoint() -> String {
    "https://itunes.apple.com/lookup".to_string()
}

fn default_country() -> String {
    "us".to_string()
}

fn default_batch_size() -> usize {
    50
}

// Duration serialization helper (milliseconds; the crate's delays are sub-second)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
