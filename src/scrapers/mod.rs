//! Access to the remote news portal.
//!
//! The ingestion core only depends on the [`PageFetcher`] capability:
//!
//! 1. **Listing**: given a listing page reference, return the raw rows on it
//! 2. **Detail**: given a story link, return the detail page HTML
//!
//! # Implementations
//!
//! | Type | Module | Notes |
//! |------|--------|-------|
//! | [`isx::HttpPageFetcher`] | [`isx`] | reqwest + scraper against the ISX portal |
//! | [`retry::RetryFetcher`] | [`retry`] | Backoff decorator for any fetcher |
//!
//! Pattern extraction from detail HTML lives in [`detail`].

pub mod detail;
pub mod isx;
pub mod retry;

use crate::error::FetchError;
use crate::models::ListingRow;
use async_trait::async_trait;

/// Source of listing rows and detail pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Rows currently visible on the listing page `page`.
    async fn fetch_listing(&self, page: &str) -> Result<Vec<ListingRow>, FetchError>;

    /// Raw HTML of the detail page behind `link`.
    async fn fetch_detail(&self, link: &str) -> Result<String, FetchError>;
}

#[cfg(test)]
pub mod fake {
    //! In-memory fetcher for pipeline and scheduler tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub struct FakeFetcher {
        pages: HashMap<String, Vec<ListingRow>>,
        details: HashMap<String, String>,
        delay: Duration,
        pub listing_calls: AtomicUsize,
        pub detail_calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Serve `rows` for `page`. Pages never registered fail to load.
        pub fn with_page(mut self, page: &str, rows: &[(&str, &str, &str)]) -> Self {
            let rows = rows
                .iter()
                .map(|(title, date, link)| ListingRow {
                    title: title.to_string(),
                    date: date.to_string(),
                    link: link.to_string(),
                })
                .collect();
            self.pages.insert(page.to_string(), rows);
            self
        }

        /// Serve `html` for `link`. Links never registered fail to load.
        pub fn with_detail(mut self, link: &str, html: &str) -> Self {
            self.details.insert(link.to_string(), html.to_string());
            self
        }

        /// Sleep this long before answering any call.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        async fn pause(&self) {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        pub fn listing_calls(&self) -> usize {
            self.listing_calls.load(Ordering::SeqCst)
        }

        pub fn detail_calls(&self) -> Vec<String> {
            self.detail_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch_listing(&self, page: &str) -> Result<Vec<ListingRow>, FetchError> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            self.pages
                .get(page)
                .cloned()
                .ok_or_else(|| FetchError::SelectorNotFound {
                    selector: ".indnews-datarow",
                    url: page.to_string(),
                })
        }

        async fn fetch_detail(&self, link: &str) -> Result<String, FetchError> {
            self.detail_calls.lock().unwrap().push(link.to_string());
            self.pause().await;
            self.details.get(link).cloned().ok_or_else(|| FetchError::Status {
                url: link.to_string(),
                status: 404,
            })
        }
    }
}
