//! Health endpoint polling with capped exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::time::Instant;

/// Growth factor applied to the poll interval after each failed attempt.
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Upper bound on the poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Floor on the poll interval, so a zero interval cannot spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Timeout for a single health request.
pub const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Default health endpoint path.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Stand-in deadline for timeouts too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, saturating to a far-off instant instead of panicking.
pub(crate) fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Interval that follows `prev`: `min(prev * 1.5, cap)`.
#[must_use]
pub fn next_interval(prev: Duration, cap: Duration) -> Duration {
    prev.mul_f64(BACKOFF_FACTOR).min(cap)
}

/// Sequence of poll intervals starting at `initial` and growing by
/// [`BACKOFF_FACTOR`] up to `cap`. Never decreasing.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    cap: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, cap: Duration) -> Self {
        let cap = cap.max(MIN_POLL_INTERVAL);
        Self {
            current: initial.clamp(MIN_POLL_INTERVAL, cap),
            cap,
        }
    }

    /// Return the current interval and step to the next one.
    pub fn advance(&mut self) -> Duration {
        let current = self.current;
        self.current = next_interval(current, self.cap);
        current
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.advance())
    }
}

/// Outcome of waiting for a server to become healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub ready: bool,
    pub elapsed: Duration,
    pub attempts: u32,
}

/// A single readiness check against a local port.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// True only if the server on `port` reports itself ready.
    async fn is_ready(&self, port: u16) -> bool;
}

/// Probes `GET http://<host>:<port><path>`, ready on HTTP 200 only.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    host: String,
    path: String,
}

impl HttpHealthProbe {
    /// Probe `127.0.0.1` on the default `/health` path.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_endpoint("127.0.0.1", DEFAULT_HEALTH_PATH)
    }

    /// Probe a custom host and path.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_endpoint(host: impl Into<String>, path: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(HEALTH_REQUEST_TIMEOUT)
            .timeout(HEALTH_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            host: host.into(),
            path: path.into(),
        })
    }

    #[must_use]
    pub fn url(&self, port: u16) -> String {
        format!("http://{}:{port}{}", self.host, self.path)
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_ready(&self, port: u16) -> bool {
        match self.client.get(self.url(port)).send().await {
            Ok(response) => {
                let status = response.status();
                tracing::trace!(port, %status, "Health probe response");
                status == StatusCode::OK
            }
            Err(e) => {
                tracing::trace!(port, error = %e, "Health probe failed");
                false
            }
        }
    }
}

/// Repeats a [`HealthProbe`] until it succeeds or the timeout elapses.
pub struct HealthPoller<'a> {
    probe: &'a dyn HealthProbe,
    timeout: Duration,
    initial_interval: Duration,
    max_interval: Duration,
}

impl<'a> HealthPoller<'a> {
    #[must_use]
    pub fn new(probe: &'a dyn HealthProbe, timeout: Duration, initial_interval: Duration) -> Self {
        Self {
            probe,
            timeout,
            initial_interval,
            max_interval: MAX_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn max_interval(mut self, cap: Duration) -> Self {
        self.max_interval = cap;
        self
    }

    /// Poll until ready or until `timeout` has elapsed.
    ///
    /// Probe failures of any kind count as "not ready yet". The last sleep
    /// is shortened so the loop ends at the deadline rather than past it.
    pub async fn wait_until_ready(&self, port: u16) -> HealthCheckResult {
        let started = Instant::now();
        let deadline = deadline_after(started, self.timeout);
        let mut backoff = Backoff::new(self.initial_interval, self.max_interval);
        let mut attempts = 0u32;

        loop {
            attempts = attempts.saturating_add(1);
            if self.probe.is_ready(port).await {
                let elapsed = started.elapsed();
                tracing::debug!(port, attempts, elapsed_ms = elapsed.as_millis(), "Server is healthy");
                return HealthCheckResult {
                    ready: true,
                    elapsed,
                    attempts,
                };
            }

            let now = Instant::now();
            if now >= deadline {
                let elapsed = started.elapsed();
                tracing::debug!(port, attempts, elapsed_ms = elapsed.as_millis(), "Health wait timed out");
                return HealthCheckResult {
                    ready: false,
                    elapsed,
                    attempts,
                };
            }

            let delay = backoff.advance().min(deadline - now);
            tracing::trace!(port, attempts, delay_ms = delay.as_millis(), "Server not ready, backing off");
            tokio::time::sleep(delay).await;
        }
    }
}
