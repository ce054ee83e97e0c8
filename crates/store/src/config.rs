use std::time::Duration;

/// Configuration for the search-store HTTP client.
#[derive(Clone)]
pub struct StoreConfig {
    /// Base URL of the store, without a trailing slash.
    pub url: String,
    /// Optional HTTP Basic credentials.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Whether to verify the store's TLS certificate. Disabled only in
    /// development setups.
    pub tls_verify: bool,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Concurrency cap across all callers; excess requests queue FIFO.
    pub max_concurrent: usize,
}

impl StoreConfig {
    /// Create a configuration targeting the given base URL.
    ///
    /// Defaults: TLS verification on, 10-second request timeout, 16
    /// concurrent requests.
    pub fn new(url: impl Into<String>) -> Self {
        let url: String = url.into();
        Self {
            url: url.trim_end_matches('/').to_owned(),
            username: None,
            password: None,
            tls_verify: true,
            request_timeout: Duration::from_secs(10),
            max_concurrent: 16,
        }
    }

    /// Set HTTP Basic credentials.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Disable TLS certificate verification.
    #[must_use]
    pub fn with_no_tls_verify(mut self) -> Self {
        self.tls_verify = false;
        self
    }

    /// Set the per-request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("tls_verify", &self.tls_verify)
            .field("request_timeout", &self.request_timeout)
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}
