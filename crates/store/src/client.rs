use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;

/// Pauses between internal retry attempts for transient faults.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(200),
    Duration::from_millis(500),
    Duration::from_millis(1500),
];

/// Decoded result of a search call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    /// Total number of matching documents.
    pub hit_total: u64,
    /// Matched document sources, up to the requested size.
    pub documents: Vec<serde_json::Value>,
    /// Aggregation results, when the request carried `aggs`.
    pub aggregations: Option<serde_json::Value>,
    /// Server-side execution time.
    pub took_ms: u64,
}

impl SearchResult {
    /// A result carrying only a hit total; used widely in tests.
    pub fn with_total(hit_total: u64) -> Self {
        Self {
            hit_total,
            ..Self::default()
        }
    }

    /// Attach an aggregation body.
    #[must_use]
    pub fn with_aggregations(mut self, aggregations: serde_json::Value) -> Self {
        self.aggregations = Some(aggregations);
        self
    }
}

/// The narrow store surface the engine depends on. Implemented over HTTP
/// by [`HttpStoreClient`] and by the in-memory mock in [`crate::testing`].
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Execute a search request against one or more index patterns.
    async fn search(
        &self,
        indices: &[String],
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, StoreError>;

    /// Count documents matching a query.
    async fn count(
        &self,
        indices: &[String],
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>;

    /// Index a document, overwriting when `id` is given.
    async fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        doc: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    /// Create an index with the given mapping if it does not exist.
    /// Idempotent.
    async fn ensure_index(
        &self,
        index: &str,
        mapping: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Store response types (internal)
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize)]
struct SearchResponse {
    #[serde(default)]
    took: u64,
    hits: SearchHits,
    #[serde(default)]
    aggregations: Option<serde_json::Value>,
}

#[derive(serde::Deserialize)]
struct SearchHits {
    total: HitsTotal,
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(serde::Deserialize)]
struct HitsTotal {
    value: u64,
}

#[derive(serde::Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: serde_json::Value,
}

#[derive(serde::Deserialize)]
struct CountResponse {
    count: u64,
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Store client speaking the search store's REST API via `reqwest`.
///
/// Transport faults and 5xx responses are retried internally up to three
/// extra attempts; 400 and 404 surface directly. A semaphore caps
/// concurrent requests at [`StoreConfig::max_concurrent`], with excess
/// callers queueing fairly.
pub struct HttpStoreClient {
    client: reqwest::Client,
    config: StoreConfig,
    permits: Arc<Semaphore>,
}

impl HttpStoreClient {
    /// Build the client. Fails only if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(!config.tls_verify)
            .user_agent(concat!("vaultize-alerting/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let permits = Arc::new(Semaphore::new(config.max_concurrent));

        Ok(Self {
            client,
            config,
            permits,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{path}", self.config.url);
        let mut req = self.client.request(method, &url);
        if let Some(ref user) = self.config.username {
            req = req.basic_auth(user, self.config.password.as_deref());
        }
        req
    }

    fn classify_send_error(&self, e: &reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(self.config.request_timeout)
        } else {
            StoreError::Transport(e.to_string())
        }
    }

    /// Send a request, retrying transient failures on the internal
    /// schedule. The semaphore permit is held across retries so one
    /// logical operation consumes one concurrency slot.
    async fn execute(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, StoreError> {
        let _permit = tokio::select! {
            permit = self.permits.acquire() => {
                permit.map_err(|_| StoreError::Cancelled)?
            }
            () = cancel.cancelled() => return Err(StoreError::Cancelled),
        };

        let mut last_err = StoreError::Transport("no attempt made".to_owned());

        for attempt in 0..=RETRY_DELAYS.len() {
            if attempt > 0 {
                let delay = RETRY_DELAYS[attempt - 1];
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return Err(StoreError::Cancelled),
                }
            }

            let outcome = tokio::select! {
                result = build().send() => result,
                () = cancel.cancelled() => return Err(StoreError::Cancelled),
            };

            match outcome {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if status < 500 {
                        return Ok(resp);
                    }
                    let body = resp.text().await.unwrap_or_default();
                    last_err = StoreError::Status { status, body };
                }
                Err(e) => last_err = self.classify_send_error(&e),
            }

            if !last_err.is_transient() {
                return Err(last_err);
            }
            warn!(attempt = attempt + 1, error = %last_err, "store request failed, retrying");
        }

        Err(last_err)
    }

    /// Map a non-2xx, non-5xx response into the matching error kind.
    async fn reject(resp: reqwest::Response, context: &str) -> StoreError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        match status {
            404 => StoreError::IndexMissing(context.to_owned()),
            400 => StoreError::BadRequest(body),
            _ => StoreError::Status { status, body },
        }
    }
}

#[async_trait]
impl SearchStore for HttpStoreClient {
    async fn search(
        &self,
        indices: &[String],
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, StoreError> {
        let path = format!("{}/_search", indices.join(","));
        let resp = self
            .execute(
                || self.request(reqwest::Method::POST, &path).json(body),
                cancel,
            )
            .await?;

        if !resp.status().is_success() {
            return Err(Self::reject(resp, &indices.join(",")).await);
        }

        let decoded: SearchResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        debug!(took_ms = decoded.took, total = decoded.hits.total.value, "search completed");

        Ok(SearchResult {
            hit_total: decoded.hits.total.value,
            documents: decoded.hits.hits.into_iter().map(|h| h.source).collect(),
            aggregations: decoded.aggregations,
            took_ms: decoded.took,
        })
    }

    async fn count(
        &self,
        indices: &[String],
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let path = format!("{}/_count", indices.join(","));
        let resp = self
            .execute(
                || self.request(reqwest::Method::POST, &path).json(body),
                cancel,
            )
            .await?;

        if !resp.status().is_success() {
            return Err(Self::reject(resp, &indices.join(",")).await);
        }

        let decoded: CountResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(decoded.count)
    }

    async fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        doc: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let (method, path) = match id {
            Some(id) => (reqwest::Method::PUT, format!("{index}/_doc/{id}")),
            None => (reqwest::Method::POST, format!("{index}/_doc")),
        };

        let resp = self
            .execute(|| self.request(method.clone(), &path).json(doc), cancel)
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::reject(resp, index).await)
        }
    }

    async fn ensure_index(
        &self,
        index: &str,
        mapping: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let head = self
            .execute(|| self.request(reqwest::Method::HEAD, index), cancel)
            .await?;
        if head.status().is_success() {
            return Ok(());
        }

        let resp = self
            .execute(
                || self.request(reqwest::Method::PUT, index).json(mapping),
                cancel,
            )
            .await?;

        // A concurrent creator may have won the race; the store reports
        // that as 400 resource_already_exists_exception.
        let status = resp.status();
        if status.is_success() {
            debug!(index, "index created");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 400 && body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
