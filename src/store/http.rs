//! HTTP record store client
//!
//! Talks to a REST JSON document store:
//!
//! - `GET  {base}/records/{key}` - 200 with the document, 404 when absent
//! - `PUT  {base}/records/{key}` - `If-None-Match: *` to create,
//!   `If-Match: *` to update; 409/412 mean the precondition failed
//!
//! Keys are URL-encoded. An optional API key is sent as a bearer token.

use reqwest::header::{IF_MATCH, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info};

use super::{RecordStore, StoreError, WriteMode};

/// Configuration for the HTTP record store
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    /// Base URL of the document store (no trailing slash needed)
    pub base_url: String,
    /// Bearer token for the store API (optional)
    pub api_key: Option<String>,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8787".to_string(),
            api_key: None,
        }
    }
}

/// Record store backed by a REST document API
pub struct HttpRecordStore {
    config: HttpStoreConfig,
    client: reqwest::Client,
}

impl HttpRecordStore {
    pub fn new(config: HttpStoreConfig) -> Self {
        info!(base_url = %config.base_url, "HttpRecordStore created");
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create with a caller-supplied client (shared connection pool)
    pub fn with_client(config: HttpStoreConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// URL of the document stored under `key`
    pub fn record_url(&self, key: &str) -> String {
        format!(
            "{}/records/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(key)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for HttpRecordStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let url = self.record_url(key);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Request failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(key = key, "Record not found");
                Ok(None)
            }
            status if status.is_success() => {
                let document = response
                    .json::<Value>()
                    .await
                    .map_err(|e| StoreError::Malformed(format!("{key}: {e}")))?;
                Ok(Some(document))
            }
            status => Err(StoreError::Unavailable(format!("HTTP {status} from {url}"))),
        }
    }

    async fn write(&self, key: &str, document: &Value, mode: WriteMode) -> Result<(), StoreError> {
        let url = self.record_url(key);
        let request = match mode {
            WriteMode::CreateIfAbsent => self.client.put(&url).header(IF_NONE_MATCH, "*"),
            WriteMode::UpdateExisting => self.client.put(&url).header(IF_MATCH, "*"),
        };

        let response = self
            .authorize(request)
            .json(document)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Request failed: {e}")))?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(StoreError::Conflict(key.to_string()))
            }
            // Update of a missing document surfaces as 404 on some stores
            StatusCode::NOT_FOUND if mode == WriteMode::UpdateExisting => {
                Err(StoreError::Conflict(key.to_string()))
            }
            status if status.is_success() => {
                debug!(key = key, mode = ?mode, "Record written");
                Ok(())
            }
            status => Err(StoreError::Unavailable(format!("HTTP {status} from {url}"))),
        }
    }
}
