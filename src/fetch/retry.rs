//! Bounded retries with exponential backoff for any [`Fetcher`].
//!
//! # Architecture
//!
//! - [`RetryPolicy`]: how many attempts, how long to wait between them
//! - [`Retrying`]: decorator that applies a policy to every call of an
//!   inner fetcher
//!
//! # Retry Strategy
//!
//! The delay before attempt `k + 1` follows:
//! ```text
//! delay = min(base_delay * 2^(k-1), max_delay) + random_jitter(0..=jitter)
//! ```
//! Only errors classified as transient by [`ScrapeError::is_retryable`] are
//! retried; everything else is returned after the first attempt.

use super::{Document, Fetcher};
use crate::error::ScrapeError;
use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Attempt budget and backoff shape shared by every request of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first (at least 1).
    pub max_attempts: usize,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    /// Upper bound for the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound of the uniform random delay added to every wait.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// A policy that never waits.
    #[cfg(test)]
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Exponential part of the wait after `failed_attempts` failures (>= 1).
    pub fn backoff(&self, failed_attempts: usize) -> Duration {
        let shift = failed_attempts.saturating_sub(1).min(31) as u32;
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    fn delay(&self, failed_attempts: usize) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=jitter_ms)
        };
        self.backoff(failed_attempts) + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, what: &str, url: &str, mut op: F) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if attempt >= self.max_attempts {
                        error!(
                            what,
                            url,
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "Retries exhausted"
                        );
                        return Err(e);
                    }

                    let delay = self.delay(attempt);
                    warn!(
                        what,
                        url,
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt,
                        ?delay,
                        error = %e,
                        "Attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Wrapper that adds bounded retries to every operation of a [`Fetcher`].
pub struct Retrying<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetcher> Retrying<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    #[cfg(test)]
    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F> fmt::Debug for Retrying<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrying")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<F: Fetcher> Fetcher for Retrying<F> {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError> {
        self.policy
            .run("page", url, || self.inner.fetch_html(url))
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_document(&self, url: &str) -> Result<Document, ScrapeError> {
        self.policy
            .run("document", url, || self.inner.fetch_document(url))
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn render_pdf(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        self.policy
            .run("print", url, || self.inner.render_pdf(url))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with the given status a fixed number of times, then succeeds.
    struct Flaky {
        failures: usize,
        status: u16,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize, status: u16) -> Self {
            Self {
                failures,
                status,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn attempt(&self, url: &str) -> Result<(), ScrapeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ScrapeError::Status {
                    status: self.status,
                    url: url.to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl Fetcher for Flaky {
        async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError> {
            self.attempt(url).map(|_| "<html></html>".to_string())
        }

        async fn fetch_document(&self, url: &str) -> Result<Document, ScrapeError> {
            self.attempt(url).map(|_| Document {
                bytes: b"%PDF-1.4".to_vec(),
                content_type: Some("application/pdf".into()),
                disposition: None,
                final_url: url.to_string(),
            })
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(16));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(60), Duration::from_secs(30));
    }

    #[test]
    fn test_new_enforces_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let fetcher = Retrying::new(Flaky::new(2, 503), RetryPolicy::immediate(3));
        let html = fetcher.fetch_html("https://example.it/").await.unwrap();
        assert_eq!(html, "<html></html>");
        assert_eq!(fetcher.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let fetcher = Retrying::new(Flaky::new(10, 502), RetryPolicy::immediate(3));
        let err = fetcher.fetch_document("https://example.it/a.pdf").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Status { status: 502, .. }));
        assert_eq!(fetcher.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let fetcher = Retrying::new(Flaky::new(10, 404), RetryPolicy::immediate(5));
        let err = fetcher.fetch_html("https://example.it/").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Status { status: 404, .. }));
        assert_eq!(fetcher.inner().calls(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_render_is_not_retried() {
        let fetcher = Retrying::new(Flaky::new(0, 200), RetryPolicy::immediate(5));
        let err = fetcher.render_pdf("https://example.it/").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Unsupported(_)));
    }
}
