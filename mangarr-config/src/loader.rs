use std::fs;
use std::path::PathBuf;

use mangarr_core::{KavitaConfig, MonitorConfig, RetryPolicy};
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::cli::CliOverrides;
use crate::models::{Config, ConfigMetadata, LibraryConfig, PathsConfig};
use crate::sources::{EnvConfig, FileConfig, pick_duration};
use crate::validation::{self, ConfigGuardRailError, ConfigWarnings};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("mangarr.toml"),
        PathBuf::from("config/mangarr.toml"),
    ]
});

const DEFAULT_LIBRARY_NAME: &str = "default";

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub overrides: CliOverrides,
}

impl From<CliOverrides> for ConfigLoaderOptions {
    fn from(overrides: CliOverrides) -> Self {
        Self {
            config_path: overrides.config_path.clone(),
            env_file: overrides.env_file.clone(),
            overrides,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env`, then resolves environment over file over defaults.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let mut load = self.load_from_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Same as [`load`](Self::load) with an explicit environment and no
    /// `.env` handling.
    pub fn load_from_env(&self, mut env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        self.options.overrides.apply(&mut env);
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) = compose_config(file_config, env, config_path)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = match (&self.options.config_path, &env.config_path) {
            (Some(path), _) | (None, Some(path)) => (path.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS.iter().find(|c| c.exists()) {
                Some(path) => (path.clone(), false),
                None => return Ok((None, None)),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(target: "config", path = %path.display(), "loaded configuration file");
        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();
    if file_config.is_none() {
        warnings.push_with_hint(
            "No mangarr.toml detected; using environment variables and defaults",
            "Create mangarr.toml or point MANGARR_CONFIG at one",
        );
    }

    let FileConfig {
        paths: file_paths,
        monitor: file_monitor,
        kavita: file_kavita,
        libraries: file_libraries,
    } = file_config.unwrap_or_default();

    let defaults = PathsConfig::default();
    let paths = PathsConfig {
        library_root: env
            .library_root
            .clone()
            .or(file_paths.library_root)
            .unwrap_or(defaults.library_root),
        cache_root: env
            .cache_root
            .clone()
            .or(file_paths.cache_root)
            .unwrap_or(defaults.cache_root),
        state_file: env
            .state_file
            .clone()
            .or(file_paths.state_file)
            .unwrap_or(defaults.state_file),
    };

    let mut monitor = MonitorConfig::default();
    let durations = [
        (
            "poll_interval",
            env.poll_interval.as_deref(),
            file_monitor.poll_interval.as_deref(),
            &mut monitor.poll_interval_ms,
        ),
        (
            "sweep_interval",
            env.sweep_interval.as_deref(),
            file_monitor.sweep_interval.as_deref(),
            &mut monitor.sweep_interval_ms,
        ),
        (
            "staleness_window",
            env.staleness_window.as_deref(),
            file_monitor.staleness_window.as_deref(),
            &mut monitor.staleness_window_ms,
        ),
        (
            "retry_window",
            env.retry_window.as_deref(),
            file_monitor.retry_window.as_deref(),
            &mut monitor.retry_window_ms,
        ),
        (
            "download_cooldown",
            env.download_cooldown.as_deref(),
            file_monitor.download_cooldown.as_deref(),
            &mut monitor.download_cooldown_ms,
        ),
        (
            "edit_cooldown",
            env.edit_cooldown.as_deref(),
            file_monitor.edit_cooldown.as_deref(),
            &mut monitor.edit_cooldown_ms,
        ),
        (
            "shutdown_grace",
            None,
            file_monitor.shutdown_grace.as_deref(),
            &mut monitor.shutdown_grace_ms,
        ),
    ];
    for (key, env_value, file_value, target) in durations {
        if let Some(duration) = pick_duration(key, env_value, file_value)? {
            *target = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        }
    }
    if let Some(attempts) = file_monitor.page_attempts {
        monitor.page_retry = RetryPolicy {
            attempts: attempts.max(1),
            ..monitor.page_retry
        };
    }

    let kavita_defaults = KavitaConfig::default();
    let kavita = KavitaConfig {
        address: env
            .kavita_address
            .clone()
            .or(file_kavita.address)
            .unwrap_or(kavita_defaults.address),
        port: env
            .kavita_port
            .or(file_kavita.port)
            .unwrap_or(kavita_defaults.port),
        ssl: env.kavita_ssl.or(file_kavita.ssl).unwrap_or(kavita_defaults.ssl),
        username: env
            .kavita_username
            .clone()
            .or(file_kavita.username)
            .unwrap_or_default(),
        password: env
            .kavita_password
            .clone()
            .or(file_kavita.password)
            .unwrap_or_default(),
        token: env
            .kavita_token
            .clone()
            .or(file_kavita.token)
            .unwrap_or_default(),
        ..kavita_defaults
    };

    let libraries = if file_libraries.is_empty() {
        vec![LibraryConfig {
            name: DEFAULT_LIBRARY_NAME.to_string(),
            folder: paths.library_root.clone(),
            kavita_library_id: None,
        }]
    } else {
        file_libraries
            .into_iter()
            .map(|library| LibraryConfig {
                folder: match library.folder {
                    Some(folder) if folder.is_absolute() => folder,
                    Some(folder) => paths.library_root.join(folder),
                    None => paths.library_root.join(&library.name),
                },
                name: library.name,
                kavita_library_id: library.kavita_library_id,
            })
            .collect()
    };

    let mut config = Config {
        paths,
        monitor,
        kavita,
        libraries,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    };

    config
        .ensure_directories()
        .map_err(|source| ConfigLoadError::Filesystem { source })?;
    config
        .normalize_paths()
        .map_err(|source| ConfigLoadError::Filesystem { source })?;

    warnings.extend(validation::apply_guard_rails(&config)?);
    Ok((config, warnings))
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration for {key}: `{value}`")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("filesystem initialization failed")]
    Filesystem {
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
