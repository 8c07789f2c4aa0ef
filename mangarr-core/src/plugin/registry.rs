use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mangarr_model::Arguments;
use tokio::sync::{Notify, RwLock};

use super::{
    PageRef, PluginError, PluginResult, RetryPolicy, SourceHandle, SourcePlugin,
    plugin_key,
};

/// Stand-in returned for keys nothing is registered under. Every call fails,
/// so jobs bound to a missing plugin stay queued instead of being dropped.
#[derive(Debug, Clone)]
pub struct NullPlugin {
    key: String,
}

impl NullPlugin {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    fn unknown<T>(&self) -> PluginResult<T> {
        Err(PluginError::UnknownPlugin(self.key.clone()))
    }
}

#[async_trait]
impl SourcePlugin for NullPlugin {
    async fn search(
        &self,
        _query: &str,
        _language: Option<&str>,
    ) -> PluginResult<Vec<Arguments>> {
        self.unknown()
    }

    async fn get_manga(&self, _arguments: &Arguments) -> PluginResult<Arguments> {
        self.unknown()
    }

    async fn get_chapters(
        &self,
        _manga: &Arguments,
    ) -> PluginResult<Vec<Arguments>> {
        self.unknown()
    }

    async fn get_pages(&self, _chapter: &Arguments) -> PluginResult<Vec<PageRef>> {
        self.unknown()
    }

    async fn download_page(
        &self,
        _url: &str,
        _page: &Arguments,
    ) -> PluginResult<Option<Vec<u8>>> {
        self.unknown()
    }
}

/// Process-wide lookup of source plugins by `"{category}_{domain}"`.
///
/// Populated once at startup, then marked loaded; the monitor waits for that
/// before its first sweep.
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn SourcePlugin>>>,
    retry: RetryPolicy,
    loaded: AtomicBool,
    loaded_notify: Notify,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("PluginRegistry");
        if let Ok(plugins) = self.plugins.try_read() {
            let mut keys: Vec<&String> = plugins.keys().collect();
            keys.sort();
            debug.field("plugins", &keys);
        }
        debug
            .field("retry", &self.retry)
            .field("loaded", &self.loaded.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl PluginRegistry {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            retry,
            loaded: AtomicBool::new(false),
            loaded_notify: Notify::new(),
        }
    }

    /// Registers (or replaces) a plugin and returns its key.
    pub async fn register(
        &self,
        category: &str,
        domain: &str,
        plugin: Arc<dyn SourcePlugin>,
    ) -> String {
        let key = plugin_key(category, domain);
        let replaced = self
            .plugins
            .write()
            .await
            .insert(key.clone(), plugin)
            .is_some();
        tracing::info!(target: "plugin", plugin = %key, replaced, "plugin registered");
        key
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.plugins.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> =
            self.plugins.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Resolves `key`, falling back to a [`NullPlugin`] when it is unknown.
    pub async fn resolve(&self, key: &str) -> SourceHandle {
        let plugin = self.plugins.read().await.get(key).cloned();
        let plugin = match plugin {
            Some(plugin) => plugin,
            None => {
                tracing::error!(target: "plugin", plugin = key, "plugin not found");
                Arc::new(NullPlugin::new(key))
            }
        };
        SourceHandle::new(key, plugin, self.retry)
    }

    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
        self.loaded_notify.notify_waiters();
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Resolves once [`mark_loaded`](Self::mark_loaded) has been called.
    pub async fn wait_loaded(&self) {
        loop {
            let notified = self.loaded_notify.notified();
            if self.is_loaded() {
                return;
            }
            notified.await;
        }
    }

    /// Removes every plugin; used on shutdown.
    pub async fn drain(&self) -> usize {
        let mut plugins = self.plugins.write().await;
        let count = plugins.len();
        plugins.clear();
        self.loaded.store(false, Ordering::Release);
        count
    }
}
