use thiserror::Error;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },
    #[error("library folder {folder} lies inside the cache root, which is wiped every sweep")]
    LibraryInsideCache { folder: String },
    #[error("library `{name}` is declared more than once")]
    DuplicateLibrary { name: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let monitor = &config.monitor;

    if monitor.poll_interval_ms == 0 {
        return Err(ConfigGuardRailError::ZeroInterval {
            field: "poll_interval",
        });
    }
    if monitor.sweep_interval_ms == 0 {
        return Err(ConfigGuardRailError::ZeroInterval {
            field: "sweep_interval",
        });
    }

    let mut names = std::collections::HashSet::new();
    for library in &config.libraries {
        if !names.insert(library.name.as_str()) {
            return Err(ConfigGuardRailError::DuplicateLibrary {
                name: library.name.clone(),
            });
        }
        if library.folder.starts_with(&config.paths.cache_root) {
            return Err(ConfigGuardRailError::LibraryInsideCache {
                folder: library.folder.display().to_string(),
            });
        }
    }

    if monitor.sweep_interval_ms < monitor.poll_interval_ms {
        warnings.push("sweep_interval is shorter than poll_interval; sweeps run once per poll");
    }

    if monitor.retry_window_ms == 0 {
        warnings.push_with_hint(
            "retry_window is zero; failing jobs are retried on every pass",
            "Set MANGARR_RETRY_WINDOW to a non-zero duration such as 1h",
        );
    }

    if config.kavita.is_enabled() {
        if config.kavita.username.is_empty() && config.kavita.token.is_empty() {
            warnings.push_with_hint(
                "KAVITA_ADDRESS is set without credentials; scans will be rejected",
                "Set KAVITA_USERNAME/KAVITA_PASSWORD or KAVITA_TOKEN",
            );
        }
        if config
            .libraries
            .iter()
            .all(|library| library.kavita_library_id.is_none())
        {
            warnings.push_with_hint(
                "Kavita is configured but no library declares kavita_library_id",
                "Add kavita_library_id to a [[library]] table to enable rescans",
            );
        }
    }

    Ok(warnings)
}
