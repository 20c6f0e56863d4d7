//! Module source fetching
//!
//! Engines load modules from inside the VM's module loader, which QuickJS
//! calls synchronously. Fetchers are therefore blocking and must only be
//! called from a VM thread (a `spawn_blocking` task or the realm thread),
//! never from an async task.

use jsbox_core::ModuleSettings;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

/// Errors that can occur while fetching module source
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("invalid module URL: {0}")]
    InvalidUrl(String),

    #[error("module too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("no module registered for {0}")]
    NotFound(String),

    #[error("no tokio runtime available to drive HTTP fetches")]
    NoRuntime,
}

/// Retrieves module source by URL
pub trait ModuleFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub type SharedFetcher = Arc<dyn ModuleFetcher>;

/// Fetches modules over HTTP(S) with `reqwest`.
///
/// The request itself runs on the tokio runtime captured at construction; the
/// calling VM thread blocks on it.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    handle: Handle,
    max_size: u64,
}

impl HttpFetcher {
    /// Build a fetcher bound to the current tokio runtime.
    pub fn new(settings: &ModuleSettings) -> Result<Self, FetchError> {
        let handle = Handle::try_current().map_err(|_| FetchError::NoRuntime)?;
        Self::with_handle(settings, handle)
    }

    pub fn with_handle(settings: &ModuleSettings, handle: Handle) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout())
            .user_agent(concat!("jsbox/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            handle,
            max_size: settings.max_module_size,
        })
    }

    async fn fetch_async(&self, url: &str) -> Result<String, FetchError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_size {
                return Err(FetchError::TooLarge {
                    size: len,
                    max: self.max_size,
                });
            }
        }

        let body = response.bytes().await?;
        if body.len() as u64 > self.max_size {
            return Err(FetchError::TooLarge {
                size: body.len() as u64,
                max: self.max_size,
            });
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

impl ModuleFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        tracing::debug!(%url, "fetching module");
        let result = self.handle.block_on(self.fetch_async(url));
        if let Err(err) = &result {
            tracing::warn!(%url, error = %err, "module fetch failed");
        }
        result
    }
}

/// In-memory module table.
///
/// Used for tests and for hosts that ship a fixed set of modules. Records
/// every request so callers can observe fetch order.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    modules: HashMap<String, String>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, url: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(url, source);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, source: impl Into<String>) {
        self.modules.insert(url.into(), source.into());
    }

    /// URLs requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl ModuleFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.requests.lock().push(url.to_string());
        self.modules
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}
