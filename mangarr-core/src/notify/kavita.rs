use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mangarr_model::Library;
use serde::{Deserialize, Serialize};
use url::Url;

use super::NotifyConnector;

/// Connection settings for a Kavita server.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KavitaConfig {
    /// Host name or IP; empty disables the connector.
    pub address: String,
    pub port: u16,
    pub ssl: bool,
    pub username: String,
    pub password: String,
    /// Kavita API key sent alongside the credentials.
    pub token: String,
    pub request_timeout_ms: u64,
}

impl fmt::Debug for KavitaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KavitaConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Default for KavitaConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 80,
            ssl: false,
            username: String::new(),
            password: String::new(),
            token: String::new(),
            request_timeout_ms: 10_000,
        }
    }
}

impl KavitaConfig {
    pub fn is_enabled(&self) -> bool {
        !self.address.trim().is_empty()
    }

    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        let scheme = if self.ssl { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{}:{}/", self.address.trim(), self.port))
    }
}

#[derive(Debug, thiserror::Error)]
enum KavitaError {
    #[error("invalid address: {0}")]
    Address(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

/// Shared Kavita session state.
///
/// After the first failed call the client is marked errored and every later
/// notification is skipped until the process restarts.
pub struct KavitaClient {
    config: KavitaConfig,
    http: reqwest::Client,
    errored: AtomicBool,
}

impl fmt::Debug for KavitaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KavitaClient")
            .field("config", &self.config)
            .field("errored", &self.errored.load(Ordering::Relaxed))
            .finish()
    }
}

impl KavitaClient {
    pub fn new(config: KavitaConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(
                    target: "monitor::notify",
                    error = %err,
                    "falling back to default http client for kavita"
                );
                reqwest::Client::new()
            });
        Self {
            config,
            http,
            errored: AtomicBool::new(false),
        }
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Requests a library scan; false when skipped or failed.
    pub async fn scan_library(&self, kavita_library_id: &str) -> bool {
        if self.is_errored() {
            tracing::debug!(
                target: "monitor::notify",
                "kavita already errored, restart to try again"
            );
            return false;
        }
        match self.try_scan(kavita_library_id).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    target: "monitor::notify",
                    address = %self.config.address,
                    error = %err,
                    "kavita notification failed"
                );
                self.errored.store(true, Ordering::Release);
                false
            }
        }
    }

    async fn try_scan(&self, kavita_library_id: &str) -> Result<(), KavitaError> {
        let base = self.config.base_url()?;

        tracing::debug!(target: "monitor::notify", %base, "authenticating with kavita");
        let login: LoginResponse = self
            .http
            .post(base.join("api/Account/login")?)
            .json(&serde_json::json!({
                "username": self.config.username,
                "password": self.config.password,
                "apiKey": self.config.token,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(token) = login.token else {
            return Ok(());
        };

        self.http
            .post(base.join("api/Library/scan")?)
            .query(&[("libraryId", kavita_library_id), ("force", "false")])
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Binds a local library to a Kavita library id.
#[derive(Debug, Clone)]
pub struct KavitaConnector {
    client: Arc<KavitaClient>,
    kavita_library_id: String,
}

impl KavitaConnector {
    pub fn new(client: Arc<KavitaClient>, kavita_library_id: impl Into<String>) -> Self {
        Self {
            client,
            kavita_library_id: kavita_library_id.into(),
        }
    }
}

#[async_trait]
impl NotifyConnector for KavitaConnector {
    fn name(&self) -> String {
        format!("kavita:{}", self.kavita_library_id)
    }

    async fn notify(&self, _library: &Library) -> bool {
        self.client.scan_library(&self.kavita_library_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_honours_ssl_and_port() {
        let config = KavitaConfig {
            address: "reader.lan".into(),
            port: 5000,
            ssl: true,
            ..KavitaConfig::default()
        };
        let base = config.base_url().unwrap();
        assert_eq!(base.as_str(), "https://reader.lan:5000/");
        assert_eq!(
            base.join("api/Library/scan").unwrap().as_str(),
            "https://reader.lan:5000/api/Library/scan"
        );
    }

    #[test]
    fn debug_output_hides_credentials() {
        let config = KavitaConfig {
            password: "hunter2".into(),
            token: "secret".into(),
            ..KavitaConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test]
    async fn first_failure_disables_the_client() {
        let client = Arc::new(KavitaClient::new(KavitaConfig {
            address: "127.0.0.1".into(),
            port: 1,
            request_timeout_ms: 500,
            ..KavitaConfig::default()
        }));
        let connector = KavitaConnector::new(client.clone(), "3");
        let library = Library::new("main", "/lib");

        assert!(!connector.notify(&library).await);
        assert!(client.is_errored());
        assert!(!connector.notify(&library).await);
    }
}
