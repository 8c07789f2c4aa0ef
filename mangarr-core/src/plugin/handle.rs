use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mangarr_model::Arguments;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{PageRef, PluginError, PluginResult, SourcePlugin};

/// Backoff applied to page downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubled after each failure.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay_ms: 0,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms)
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Call-site wrapper around a plugin.
///
/// Fills the keys the pipeline depends on when a plugin leaves them out:
/// `url` on series data, `volume_number` (1.0), `chapter_number` (0.0) and
/// `arguments` ({}) on chapter entries. Page downloads are retried with
/// exponential backoff before reporting `None`.
#[derive(Clone)]
pub struct SourceHandle {
    key: String,
    plugin: Arc<dyn SourcePlugin>,
    retry: RetryPolicy,
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("key", &self.key)
            .field("retry", &self.retry)
            .finish()
    }
}

impl SourceHandle {
    pub fn new(
        key: impl Into<String>,
        plugin: Arc<dyn SourcePlugin>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            key: key.into(),
            plugin,
            retry,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn search(
        &self,
        query: &str,
        language: Option<&str>,
    ) -> PluginResult<Vec<Arguments>> {
        self.plugin.search(query, language).await
    }

    /// Series metadata with `url` defaulted from the request bag.
    pub async fn get_manga(&self, arguments: &Arguments) -> PluginResult<Arguments> {
        let mut data = self.plugin.get_manga(arguments).await?;
        if !data.get("url").is_some_and(Value::is_string)
            && let Some(url) = arguments.get("url").filter(|v| v.is_string())
        {
            data.insert("url".into(), url.clone());
        }
        Ok(data)
    }

    /// Chapter entries with numbering and `arguments` defaults filled.
    pub async fn get_chapters(
        &self,
        manga: &Arguments,
    ) -> PluginResult<Vec<Arguments>> {
        let mut chapters = self.plugin.get_chapters(manga).await?;
        for chapter in &mut chapters {
            default_key(chapter, "volume_number", json!(1.0));
            default_key(chapter, "chapter_number", json!(0.0));
            default_key(chapter, "arguments", json!({}));
        }
        Ok(chapters)
    }

    /// Pages without a url are dropped.
    pub async fn get_pages(&self, chapter: &Arguments) -> PluginResult<Vec<PageRef>> {
        let mut pages = self.plugin.get_pages(chapter).await?;
        pages.retain(|page| !page.url.is_empty());
        Ok(pages)
    }

    /// Fetches `page` with its own arguments, retrying failed or empty
    /// downloads; `None` once attempts run out.
    pub async fn download_page(&self, page: &PageRef) -> Option<Vec<u8>> {
        let url = page.url.as_str();
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self.plugin.download_page(url, &page.arguments).await {
                Ok(Some(bytes)) => return Some(bytes),
                Ok(None) => {
                    tracing::debug!(
                        target: "plugin",
                        plugin = %self.key,
                        url,
                        attempt,
                        "page download returned nothing"
                    );
                }
                Err(err) => {
                    tracing::debug!(
                        target: "plugin",
                        plugin = %self.key,
                        url,
                        attempt,
                        error = %err,
                        "page download failed"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
        }
        None
    }
}

fn default_key(entry: &mut Arguments, key: &str, value: Value) {
    if entry.get(key).is_none_or(Value::is_null) {
        entry.insert(key.to_string(), value);
    }
}

/// Reads a required string key from plugin output.
pub(crate) fn required_str<'a>(
    data: &'a Arguments,
    key: &'static str,
) -> PluginResult<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(PluginError::MissingField(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        seen: tokio::sync::Mutex<Vec<Arguments>>,
    }

    #[async_trait]
    impl SourcePlugin for Flaky {
        async fn search(
            &self,
            _query: &str,
            _language: Option<&str>,
        ) -> PluginResult<Vec<Arguments>> {
            Ok(Vec::new())
        }

        async fn get_manga(&self, _arguments: &Arguments) -> PluginResult<Arguments> {
            Ok(json!({"name": "Series"}).as_object().cloned().unwrap_or_default())
        }

        async fn get_chapters(
            &self,
            _manga: &Arguments,
        ) -> PluginResult<Vec<Arguments>> {
            let entry = json!({"url": "c1", "chapter_number": 4});
            Ok(vec![entry.as_object().cloned().unwrap_or_default()])
        }

        async fn get_pages(&self, _chapter: &Arguments) -> PluginResult<Vec<PageRef>> {
            Ok(vec![
                PageRef::new("p1"),
                PageRef::new(""),
                PageRef::new("p2").with_arguments(
                    json!({"referer": "https://x/c1"}).as_object().cloned().unwrap_or_default(),
                ),
            ])
        }

        async fn download_page(
            &self,
            _url: &str,
            page: &Arguments,
        ) -> PluginResult<Option<Vec<u8>>> {
            self.seen.lock().await.push(page.clone());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PluginError::Request("timeout".into()))
            } else {
                Ok(Some(vec![1, 2, 3]))
            }
        }
    }

    fn handle(failures: u32, attempts: u32) -> (SourceHandle, Arc<Flaky>) {
        let plugin = Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
            seen: tokio::sync::Mutex::new(Vec::new()),
        });
        let retry = RetryPolicy {
            attempts,
            base_delay_ms: 0,
        };
        (SourceHandle::new("manga_flaky", plugin.clone(), retry), plugin)
    }

    #[tokio::test]
    async fn manga_url_defaults_from_request() {
        let (handle, _) = handle(0, 1);
        let request = json!({"url": "https://x/m/1"});
        let data = handle
            .get_manga(request.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(data.get("url"), Some(&json!("https://x/m/1")));
        assert_eq!(data.get("name"), Some(&json!("Series")));
    }

    #[tokio::test]
    async fn chapter_entries_get_numbering_defaults() {
        let (handle, _) = handle(0, 1);
        let chapters = handle.get_chapters(&Arguments::new()).await.unwrap();
        let entry = &chapters[0];
        assert_eq!(entry.get("volume_number"), Some(&json!(1.0)));
        assert_eq!(entry.get("chapter_number"), Some(&json!(4)));
        assert_eq!(entry.get("arguments"), Some(&json!({})));
    }

    #[tokio::test]
    async fn downloads_retry_until_success() {
        let (handle, plugin) = handle(2, 3);
        let bytes = handle.download_page(&PageRef::new("p1")).await;
        assert_eq!(bytes, Some(vec![1, 2, 3]));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn downloads_give_up_after_attempts() {
        let (handle, plugin) = handle(5, 2);
        assert!(handle.download_page(&PageRef::new("p1")).await.is_none());
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pages_keep_their_own_arguments() {
        let (handle, plugin) = handle(0, 1);
        let pages = handle.get_pages(&Arguments::new()).await.unwrap();
        assert_eq!(pages.len(), 2, "pages without a url are dropped");

        assert!(handle.download_page(&pages[1]).await.is_some());
        let seen = plugin.seen.lock().await;
        assert_eq!(seen[0].get("referer"), Some(&json!("https://x/c1")));
    }

    #[test]
    fn backoff_doubles() {
        let retry = RetryPolicy {
            attempts: 4,
            base_delay_ms: 100,
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(3), Duration::from_millis(400));
    }
}
