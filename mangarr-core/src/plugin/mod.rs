//! Source plugin port.
//!
//! A plugin knows how to turn a series url into metadata, a chapter list,
//! page urls and page bytes. Everything it returns is a loosely typed
//! [`Arguments`] bag; the pipeline only relies on the keys documented on
//! [`SourceHandle`].

mod handle;
mod registry;

pub use handle::{RetryPolicy, SourceHandle};
pub(crate) use handle::required_str;
pub use registry::{NullPlugin, PluginRegistry};

use async_trait::async_trait;
use mangarr_model::Arguments;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no plugin registered under `{0}`")]
    UnknownPlugin(String),

    #[error("source request failed: {0}")]
    Request(String),

    #[error("source response missing `{0}`")]
    MissingField(&'static str),

    #[error("source returned malformed data: {0}")]
    Malformed(String),
}

pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// One page of a chapter and whatever the source needs to fetch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRef {
    pub url: String,
    #[serde(default)]
    pub arguments: Arguments,
}

impl PageRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            arguments: Arguments::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Registry key for a plugin: `"{category}_{domain}"`.
pub fn plugin_key(category: &str, domain: &str) -> String {
    format!("{category}_{domain}")
}

#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Free-text search; each hit carries at least a `url`.
    async fn search(
        &self,
        query: &str,
        language: Option<&str>,
    ) -> PluginResult<Vec<Arguments>>;

    /// Series metadata for the bag a job was created with.
    async fn get_manga(&self, arguments: &Arguments) -> PluginResult<Arguments>;

    /// One entry per chapter, each with a `url`.
    async fn get_chapters(&self, manga: &Arguments)
    -> PluginResult<Vec<Arguments>>;

    /// Ordered pages. An empty list means "not published yet".
    async fn get_pages(&self, chapter: &Arguments) -> PluginResult<Vec<PageRef>>;

    /// Page bytes, or `None` when the page could not be fetched. `page`
    /// is the bag the page was listed with.
    async fn download_page(
        &self,
        url: &str,
        page: &Arguments,
    ) -> PluginResult<Option<Vec<u8>>>;
}
