use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mangarr_core::{KavitaConfig, MonitorConfig};

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    pub monitor: MonitorConfig,
    pub kavita: KavitaConfig,
    pub libraries: Vec<LibraryConfig>,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    /// Parent of every library folder.
    pub library_root: PathBuf,
    /// Staging area for downloads and repackaging; wiped every sweep.
    pub cache_root: PathBuf,
    /// JSON snapshot of the record store.
    pub state_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            library_root: PathBuf::from("./library"),
            cache_root: PathBuf::from("./cache"),
            state_file: PathBuf::from("./data/mangarr-state.json"),
        }
    }
}

/// A library declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    pub name: String,
    pub folder: PathBuf,
    /// Kavita library to rescan when this library changes.
    pub kavita_library_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Config {
    /// Creates the library, cache and state directories.
    pub fn ensure_directories(&self) -> io::Result<()> {
        fs::create_dir_all(&self.paths.library_root)?;
        fs::create_dir_all(&self.paths.cache_root)?;
        if let Some(parent) = self.paths.state_file.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        for library in &self.libraries {
            fs::create_dir_all(&library.folder)?;
        }
        Ok(())
    }

    /// Makes every configured path absolute; call after
    /// [`ensure_directories`](Self::ensure_directories).
    pub fn normalize_paths(&mut self) -> io::Result<()> {
        self.paths.library_root = absolute(&self.paths.library_root)?;
        self.paths.cache_root = absolute(&self.paths.cache_root)?;
        self.paths.state_file = absolute(&self.paths.state_file)?;
        for library in &mut self.libraries {
            library.folder = absolute(&library.folder)?;
        }
        Ok(())
    }
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(path) => Ok(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => std::path::absolute(path),
        Err(err) => Err(err),
    }
}
