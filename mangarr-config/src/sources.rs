use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::loader::ConfigLoadError;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub paths: FilePathsConfig,
    #[serde(default)]
    pub monitor: FileMonitorConfig,
    #[serde(default)]
    pub kavita: FileKavitaConfig,
    #[serde(default, rename = "library")]
    pub libraries: Vec<FileLibraryConfig>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePathsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

/// Durations are humantime strings such as `"10s"` or `"1h 30m"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileMonitorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staleness_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_cooldown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_cooldown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_attempts: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileKavitaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileLibraryConfig {
    pub name: String,
    /// Relative folders resolve against the library root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kavita_library_id: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub library_root: Option<PathBuf>,
    pub cache_root: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub poll_interval: Option<String>,
    pub sweep_interval: Option<String>,
    pub staleness_window: Option<String>,
    pub retry_window: Option<String>,
    pub download_cooldown: Option<String>,
    pub edit_cooldown: Option<String>,
    pub kavita_address: Option<String>,
    pub kavita_port: Option<u16>,
    pub kavita_ssl: Option<bool>,
    pub kavita_username: Option<String>,
    pub kavita_password: Option<String>,
    pub kavita_token: Option<String>,
}

impl EnvConfig {
    /// Reads the process environment.
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the environment view from an arbitrary lookup. Blank values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            config_path: var("MANGARR_CONFIG").map(PathBuf::from),
            library_root: var("MANGARR_LIBRARY_ROOT").map(PathBuf::from),
            cache_root: var("MANGARR_CACHE_ROOT").map(PathBuf::from),
            state_file: var("MANGARR_STATE_FILE").map(PathBuf::from),
            poll_interval: var("MANGARR_POLL_INTERVAL"),
            sweep_interval: var("MANGARR_SWEEP_INTERVAL"),
            staleness_window: var("MANGARR_STALENESS_WINDOW"),
            retry_window: var("MANGARR_RETRY_WINDOW"),
            download_cooldown: var("MANGARR_DOWNLOAD_COOLDOWN"),
            edit_cooldown: var("MANGARR_EDIT_COOLDOWN"),
            kavita_address: var("KAVITA_ADDRESS"),
            kavita_port: var("KAVITA_PORT").and_then(|s| s.trim().parse().ok()),
            kavita_ssl: var("KAVITA_SSL").and_then(|s| parse_bool(&s)),
            kavita_username: var("KAVITA_USERNAME"),
            kavita_password: var("KAVITA_PASSWORD"),
            kavita_token: var("KAVITA_TOKEN"),
        }
    }
}

/// Accepts `1/0`, `true/false`, `yes/no` and `on/off`, case-insensitively.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses a humantime duration, naming `key` in the error.
pub fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|source| ConfigLoadError::InvalidDuration {
        key,
        value: raw.to_string(),
        source,
    })
}

/// First present value of `env` then `file`, parsed as a duration.
pub(crate) fn pick_duration(
    key: &'static str,
    env: Option<&str>,
    file: Option<&str>,
) -> Result<Option<Duration>, ConfigLoadError> {
    env.or(file).map(|raw| parse_duration(key, raw)).transpose()
}
