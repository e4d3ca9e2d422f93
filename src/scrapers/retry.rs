//! Exponential backoff for any [`PageFetcher`].
//!
//! The portal is slow and drops connections under load, so each listing and
//! detail request is retried before the failure is handed to the pipeline's
//! per-page / per-item degradation policy.
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! Only [transient](FetchError::is_transient) failures are retried. A 404 or
//! a listing page without the expected rows comes back on the first attempt.

use super::PageFetcher;
use crate::error::FetchError;
use crate::models::ListingRow;
use async_trait::async_trait;
use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

/// Decorator that retries the wrapped fetcher's calls with backoff.
pub struct RetryFetcher<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryFetcher<T>
where
    T: PageFetcher,
{
    /// `max_retries` counts retries after the first attempt; zero disables retrying.
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }

    async fn with_retry<R, F, Fut>(
        &self,
        what: &str,
        resource: &str,
        mut call: F,
    ) -> Result<R, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, FetchError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_total = total_t0.elapsed().as_millis();
                    if !e.is_transient() {
                        warn!(
                            what,
                            resource,
                            attempt,
                            elapsed_ms_total,
                            error = %e,
                            "Fetch failed permanently; not retrying"
                        );
                        return Err(e);
                    }
                    if attempt > self.max_retries {
                        error!(
                            what,
                            resource,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total,
                            error = %e,
                            "Fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        what,
                        resource,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "Fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryFetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetcher")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait]
impl<T> PageFetcher for RetryFetcher<T>
where
    T: PageFetcher,
{
    async fn fetch_listing(&self, page: &str) -> Result<Vec<ListingRow>, FetchError> {
        self.with_retry("listing", page, || self.inner.fetch_listing(page))
            .await
    }

    async fn fetch_detail(&self, link: &str) -> Result<String, FetchError> {
        self.with_retry("detail", link, || self.inner.fetch_detail(link))
            .await
    }
}
