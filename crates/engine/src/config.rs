use std::path::PathBuf;
use std::time::Duration;

/// Engine-level configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory of rule JSON files.
    pub rules_dir: PathBuf,
    /// Cap on evaluations running at once; excess ticks queue FIFO on the
    /// semaphore.
    pub max_concurrent_evaluations: usize,
    /// How long shutdown waits for in-flight work to settle.
    pub shutdown_grace: Duration,
    /// Externally reachable base URL of the management API, used to build
    /// `url_to_rule` links in notifications.
    pub external_url: String,
}

impl EngineConfig {
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
            max_concurrent_evaluations: 32,
            shutdown_grace: Duration::from_secs(5),
            external_url: "http://localhost:9600".to_owned(),
        }
    }

    /// Set the evaluation concurrency cap.
    #[must_use]
    pub fn with_max_concurrent_evaluations(mut self, max: usize) -> Self {
        self.max_concurrent_evaluations = max;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the external base URL for `url_to_rule` links.
    #[must_use]
    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.external_url = url.trim_end_matches('/').to_owned();
        self
    }
}
