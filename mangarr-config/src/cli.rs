use std::path::PathBuf;

use clap::Args;

use crate::sources::EnvConfig;

/// Command-line overrides; these win over both environment and file.
#[derive(Args, Debug, Default, Clone)]
pub struct CliOverrides {
    /// Path to mangarr.toml
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Path to a .env file loaded before reading the environment
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Parent folder of every library
    #[arg(long, value_name = "DIR")]
    pub library_root: Option<PathBuf>,

    /// Staging folder for downloads; wiped every sweep
    #[arg(long, value_name = "DIR")]
    pub cache_root: Option<PathBuf>,

    /// JSON snapshot of the catalog and job queues
    #[arg(long, value_name = "FILE")]
    pub state_file: Option<PathBuf>,

    /// Idle poll interval, e.g. `10s`
    #[arg(long, value_name = "DURATION")]
    pub poll_interval: Option<String>,

    /// Time between scheduled sweeps, e.g. `1h`
    #[arg(long, value_name = "DURATION")]
    pub sweep_interval: Option<String>,
}

impl CliOverrides {
    /// Layers the flags over an environment snapshot.
    pub fn apply(&self, env: &mut EnvConfig) {
        if let Some(path) = &self.library_root {
            env.library_root = Some(path.clone());
        }
        if let Some(path) = &self.cache_root {
            env.cache_root = Some(path.clone());
        }
        if let Some(path) = &self.state_file {
            env.state_file = Some(path.clone());
        }
        if let Some(value) = &self.poll_interval {
            env.poll_interval = Some(value.clone());
        }
        if let Some(value) = &self.sweep_interval {
            env.sweep_interval = Some(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_replace_environment_values() {
        let mut env = EnvConfig {
            library_root: Some(PathBuf::from("/env/library")),
            poll_interval: Some("30s".into()),
            ..EnvConfig::default()
        };
        let overrides = CliOverrides {
            library_root: Some(PathBuf::from("/cli/library")),
            ..CliOverrides::default()
        };
        overrides.apply(&mut env);
        assert_eq!(env.library_root, Some(PathBuf::from("/cli/library")));
        assert_eq!(env.poll_interval.as_deref(), Some("30s"));
    }
}
