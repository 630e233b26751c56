//! Daemon configuration.
//!
//! Settings are layered with figment, later layers winning:
//!
//! 1. Built-in defaults (matching a stock scanbd installation)
//! 2. TOML file (`--config`, `/etc/scan-relay/config.toml`, or the per-user
//!    config directory)
//! 3. `SCAN_RELAY_*` environment variables, nested keys separated by `__`
//!    (e.g. `SCAN_RELAY_UPLOAD__BACKEND_URL`)
//! 4. CLI flags, applied by the caller
//!
//! Unknown keys in the TOML file are rejected with a suggestion for the
//! closest known key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::canonical_signal_name;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/scan-relay/config.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "SCAN_RELAY_";

/// Upper bound for the trigger file poll interval.
pub const MAX_POLL_INTERVAL_MS: u64 = 1000;

/// Minimum similarity for a "did you mean" suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML.
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The config file contains a key this version does not know.
    #[error("unknown configuration key `{key}`{}", did_you_mean(.suggestion))]
    UnknownKey {
        key: String,
        suggestion: Option<String>,
    },

    /// The merged configuration does not match the expected types.
    #[error("invalid configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    /// A value is out of range or malformed.
    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: String, message: String },

    /// The configuration could not be rendered as TOML.
    #[error("cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean `{}`?)", s))
        .unwrap_or_default()
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Handshake with the process that owns the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationSettings {
    /// Name of the owning process.
    pub process: String,
    /// Signal asking it to release the scanner.
    pub acquire_signal: String,
    /// Signal handing the scanner back.
    pub release_signal: String,
}

impl Default for ArbitrationSettings {
    fn default() -> Self {
        Self {
            process: "scanbd".to_string(),
            acquire_signal: "SIGUSR1".to_string(),
            release_signal: "SIGUSR2".to_string(),
        }
    }
}

/// Scanner discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Seconds between enumeration attempts.
    pub backoff_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self { backoff_secs: 10 }
    }
}

/// Event sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Flag file touched on a scan button press.
    pub scan_trigger_file: PathBuf,
    /// Flag file touched when a page is loaded.
    pub page_loaded_file: PathBuf,
    /// Poll interval for the flag files, in milliseconds.
    pub poll_interval_ms: u64,
    /// Also accept SIGUSR1/SIGUSR2 as events.
    pub listen_signals: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            scan_trigger_file: PathBuf::from("/tmp/scan"),
            page_loaded_file: PathBuf::from("/tmp/page-loaded"),
            poll_interval_ms: 500,
            listen_signals: true,
        }
    }
}

/// Scanner access and page storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// `scanimage` executable.
    pub program: PathBuf,
    /// Extra arguments for every scan.
    pub extra_args: Vec<String>,
    /// Directory session directories are created in.
    pub session_root: PathBuf,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("scanimage"),
            extra_args: Vec::new(),
            session_root: PathBuf::from("/tmp"),
        }
    }
}

/// Document naming and assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    /// Directory holding the `<n>.ctr` counter marker.
    pub counter_dir: PathBuf,
    /// Image-to-PDF converter.
    pub assembler: String,
    /// Document file name prefix.
    pub prefix: String,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            counter_dir: PathBuf::from("/etc/scanbd/scripts"),
            assembler: "img2pdf".to_string(),
            prefix: "invoice".to_string(),
        }
    }
}

/// Backend upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Upload finished documents.
    pub enabled: bool,
    /// Backend base URL. Takes precedence over `backend_url_file`.
    pub backend_url: Option<String>,
    /// File whose first line is the backend base URL.
    pub backend_url_file: PathBuf,
    /// Device id. Defaults to the board serial number.
    pub device_id: Option<String>,
    /// Where the board serial number is read from.
    pub cpuinfo_path: PathBuf,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend_url: None,
            backend_url_file: PathBuf::from("/etc/scanbd/scripts/backend_url"),
            device_id: None,
            cpuinfo_path: PathBuf::from("/proc/cpuinfo"),
            timeout_secs: 60,
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ownership handshake.
    pub arbitration: ArbitrationSettings,
    /// Scanner discovery.
    pub discovery: DiscoverySettings,
    /// Event sources.
    pub events: EventSettings,
    /// Scanner access.
    pub scanner: ScannerSettings,
    /// Document naming and assembly.
    pub document: DocumentSettings,
    /// Backend upload.
    pub upload: UploadSettings,
}

impl Config {
    /// Build the figment for an optional config file.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load, merge and validate the configuration.
    ///
    /// With `path == None` the default locations are searched; a missing
    /// default file is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is missing (when explicitly
    /// given), malformed, contains unknown keys, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path(),
        };

        if let Some(path) = &path {
            log::debug!("Loading configuration from {}", path.display());
            check_unknown_keys(path)?;
        }

        let mut config: Config = Self::figment(path.as_deref())
            .extract()
            .map_err(Box::new)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Rewrite recognised signal names in canonical `SIG<NAME>` form.
    pub fn normalize(&mut self) {
        for signal in [
            &mut self.arbitration.acquire_signal,
            &mut self.arbitration.release_signal,
        ] {
            if let Some(canonical) = canonical_signal_name(signal) {
                *signal = canonical;
            }
        }
    }

    /// First existing default config file, if any.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        let system = PathBuf::from(SYSTEM_CONFIG_PATH);
        if system.exists() {
            return Some(system);
        }
        ProjectDirs::from("org", "scan-relay", "scan-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .filter(|path| path.exists())
    }

    /// Check ranges and formats.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arbitration.process.trim().is_empty() {
            return Err(invalid("arbitration.process", "must not be empty"));
        }
        for (field, signal) in [
            ("arbitration.acquire_signal", &self.arbitration.acquire_signal),
            ("arbitration.release_signal", &self.arbitration.release_signal),
        ] {
            if !is_signal_name(signal) {
                return Err(invalid(field, format!("unknown signal `{}`", signal)));
            }
        }
        if canonical_signal_name(&self.arbitration.acquire_signal)
            == canonical_signal_name(&self.arbitration.release_signal)
        {
            return Err(invalid(
                "arbitration.release_signal",
                "must differ from acquire_signal",
            ));
        }
        if !(1..=MAX_POLL_INTERVAL_MS).contains(&self.events.poll_interval_ms) {
            return Err(invalid(
                "events.poll_interval_ms",
                format!("must be between 1 and {}", MAX_POLL_INTERVAL_MS),
            ));
        }
        if self.events.scan_trigger_file == self.events.page_loaded_file {
            return Err(invalid(
                "events.page_loaded_file",
                "must differ from scan_trigger_file",
            ));
        }
        if self.scanner.program.as_os_str().is_empty() {
            return Err(invalid("scanner.program", "must not be empty"));
        }
        if self.document.assembler.trim().is_empty() {
            return Err(invalid("document.assembler", "must not be empty"));
        }
        if self.document.prefix.trim().is_empty() || self.document.prefix.contains('/') {
            return Err(invalid("document.prefix", "must be a non-empty file name"));
        }
        if self.upload.timeout_secs == 0 {
            return Err(invalid("upload.timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Render`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Accepts `SIGUSR1`, `USR1`, or the lowercase forms.
fn is_signal_name(name: &str) -> bool {
    canonical_signal_name(name).is_some()
}

/// Known keys per section, taken from a fully populated default config.
fn known_keys() -> BTreeMap<String, Vec<String>> {
    let mut sample = Config::default();
    sample.upload.backend_url = Some(String::new());
    sample.upload.device_id = Some(String::new());

    let mut keys = BTreeMap::new();
    if let Ok(toml::Value::Table(table)) = toml::Value::try_from(&sample) {
        for (section, value) in table {
            let fields = match value {
                toml::Value::Table(fields) => fields.keys().cloned().collect(),
                _ => Vec::new(),
            };
            keys.insert(section, fields);
        }
    }
    keys
}

fn suggest<'a>(key: &str, candidates: impl IntoIterator<Item = &'a String>) -> Option<String> {
    candidates
        .into_iter()
        .map(|candidate| (strsim::jaro_winkler(key, candidate), candidate))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| candidate.clone())
}

/// Reject keys in `path` that no config field consumes.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownKey`] for the first unknown key.
pub fn check_unknown_keys(path: &Path) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let table: toml::Table = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let known = known_keys();
    for (section, value) in &table {
        let Some(fields) = known.get(section) else {
            return Err(ConfigError::UnknownKey {
                key: section.clone(),
                suggestion: suggest(section, known.keys()),
            });
        };
        if let toml::Value::Table(entries) = value {
            for key in entries.keys() {
                if !fields.contains(key) {
                    return Err(ConfigError::UnknownKey {
                        key: format!("{}.{}", section, key),
                        suggestion: suggest(key, fields).map(|s| format!("{}.{}", section, s)),
                    });
                }
            }
        }
    }
    Ok(())
}
