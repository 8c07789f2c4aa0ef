use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::monitor::MonitorConfig;
use crate::plugin::PluginRegistry;
use crate::progress::ProgressHub;
use crate::store::Store;

/// Everything a job needs to run.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn Store>,
    pub plugins: Arc<PluginRegistry>,
    pub progress: ProgressHub,
    /// Transient staging area, wiped at the start of every sweep pass.
    pub cache_dir: PathBuf,
    pub config: MonitorConfig,
    pub stop: CancellationToken,
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("plugins", &self.plugins)
            .field("cache_dir", &self.cache_dir)
            .field("config", &self.config)
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}

impl PipelineContext {
    pub fn new(
        store: Arc<dyn Store>,
        plugins: Arc<PluginRegistry>,
        progress: ProgressHub,
        cache_dir: impl Into<PathBuf>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            plugins,
            progress,
            cache_dir: cache_dir.into(),
            config,
            stop: CancellationToken::new(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Pushes fresh job counts to progress observers.
    pub async fn refresh_backlog(&self) -> Result<()> {
        let counts = self.store.job_counts().await?;
        self.progress.backlog(counts).await;
        Ok(())
    }

    /// Sleeps for `delay` unless a stop is requested first.
    pub async fn cooldown(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
