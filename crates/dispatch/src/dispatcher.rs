use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use vaultize_core::{
    ActionOutcome, ActionSpec, ActionStatus, AlertContext, DeliveryReport, HttpMethod,
    render_value,
};

use crate::backoff::retry_delay;
use crate::config::DispatcherConfig;

/// Delivers rendered notifications to webhook endpoints.
///
/// Actions of a single alert fan out in parallel under a shared
/// cancellation token; a semaphore caps concurrent deliveries across all
/// alerts. Transport errors, 408, 429, and 5xx responses are retried on
/// an exponential backoff with jitter; other 4xx responses are permanent
/// recipient-side failures.
pub struct Dispatcher {
    client: reqwest::Client,
    config: DispatcherConfig,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Build a dispatcher with its own HTTP client.
    pub fn new(config: DispatcherConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vaultize-alerting/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client");
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            client,
            config,
            permits,
        }
    }

    /// Deliver to every action in parallel and collect the aggregate
    /// report. Never fails; failures are recorded per action.
    pub async fn dispatch(
        &self,
        actions: &[ActionSpec],
        ctx: &AlertContext,
        cancel: &CancellationToken,
    ) -> DeliveryReport {
        let outcomes = join_all(
            actions
                .iter()
                .map(|action| self.deliver_action(action, ctx, cancel)),
        )
        .await;
        let report = DeliveryReport::from_outcomes(outcomes);
        debug!(rule = %ctx.name, status = ?report.status, "dispatch completed");
        report
    }

    fn method_for(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    #[instrument(skip_all, fields(rule = %ctx.name, url = %action.url))]
    async fn deliver_action(
        &self,
        action: &ActionSpec,
        ctx: &AlertContext,
        cancel: &CancellationToken,
    ) -> ActionOutcome {
        let started = Instant::now();
        let fail = |attempts: u32, http_status: Option<u16>, started: Instant| ActionOutcome {
            url: action.url.clone(),
            status: ActionStatus::PermanentlyFailed,
            http_status,
            attempts,
            elapsed_ms: elapsed_ms(started),
        };

        let _permit = tokio::select! {
            permit = self.permits.acquire() => match permit {
                Ok(p) => p,
                Err(_) => return fail(0, None, started),
            },
            () = cancel.cancelled() => return fail(0, None, started),
        };

        let body = render_value(&action.body, ctx);
        let timeout = action.timeout.unwrap_or(self.config.default_timeout);

        let mut last_status = None;

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                let delay = retry_delay(
                    self.config.base_delay,
                    self.config.max_delay,
                    attempt - 1,
                );
                // The retry budget is bounded in wall-clock time, not just
                // attempts.
                if started.elapsed() + delay > self.config.overall_budget {
                    warn!(attempt, "delivery budget exhausted");
                    return fail(attempt - 1, last_status, started);
                }
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return fail(attempt - 1, last_status, started),
                }
            }

            // `json` sets Content-Type: application/json.
            let mut request = self
                .client
                .request(Self::method_for(action.method), &action.url)
                .timeout(timeout)
                .json(&body);
            for (key, value) in &action.headers {
                request = request.header(key, value);
            }

            let outcome = tokio::select! {
                result = request.send() => result,
                () = cancel.cancelled() => return fail(attempt, last_status, started),
            };

            match outcome {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    last_status = Some(status);
                    if resp.status().is_success() {
                        debug!(attempt, status, "notification delivered");
                        return ActionOutcome {
                            url: action.url.clone(),
                            status: ActionStatus::Delivered,
                            http_status: Some(status),
                            attempts: attempt,
                            elapsed_ms: elapsed_ms(started),
                        };
                    }
                    if !is_retryable_status(status) {
                        warn!(attempt, status, "permanent recipient-side failure");
                        return fail(attempt, Some(status), started);
                    }
                    warn!(attempt, status, "retryable delivery failure");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "delivery transport failure");
                }
            }
        }

        warn!(attempts = self.config.max_attempts, "delivery retries exhausted");
        fail(self.config.max_attempts, last_status, started)
    }
}

/// 408 and 429 are the only retryable client-side statuses; everything
/// else below 500 is a permanent recipient-side error.
fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
