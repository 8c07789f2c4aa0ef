//! Library-change notifications to external readers.

mod kavita;

pub use kavita::{KavitaClient, KavitaConfig, KavitaConnector};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use mangarr_model::{Library, LibraryId};
use tokio::sync::RwLock;

/// Something that wants to know when a library's files changed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotifyConnector: Send + Sync {
    fn name(&self) -> String;

    /// False when the notification did not go through. Never retried.
    async fn notify(&self, library: &Library) -> bool;
}

/// Connectors registered per library.
#[derive(Default)]
pub struct Notifier {
    connectors: RwLock<HashMap<LibraryId, Vec<Arc<dyn NotifyConnector>>>>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Notifier");
        if let Ok(connectors) = self.connectors.try_read() {
            debug.field("libraries", &connectors.len());
        }
        debug.finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        library_id: LibraryId,
        connector: Arc<dyn NotifyConnector>,
    ) {
        self.connectors
            .write()
            .await
            .entry(library_id)
            .or_default()
            .push(connector);
    }

    pub async fn connector_count(&self, library_id: LibraryId) -> usize {
        self.connectors
            .read()
            .await
            .get(&library_id)
            .map_or(0, Vec::len)
    }

    /// Notifies every connector of `library`; returns how many succeeded.
    pub async fn notify(&self, library: &Library) -> usize {
        let connectors = self
            .connectors
            .read()
            .await
            .get(&library.id)
            .cloned()
            .unwrap_or_default();

        let results = join_all(
            connectors
                .iter()
                .map(|connector| async move { (connector.name(), connector.notify(library).await) }),
        )
        .await;

        let mut delivered = 0;
        for (connector, ok) in results {
            if ok {
                delivered += 1;
                tracing::debug!(
                    target: "monitor::notify",
                    library = %library.name,
                    connector = %connector,
                    "library notified"
                );
            } else {
                tracing::warn!(
                    target: "monitor::notify",
                    library = %library.name,
                    connector = %connector,
                    "connector notification failed"
                );
            }
        }
        delivered
    }
}
