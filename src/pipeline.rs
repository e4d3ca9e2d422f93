//! The market-news ingestion pipeline.
//!
//! One run walks these stages in order:
//!
//! ```text
//! Idle → GatheringListing → Reconciling → FetchingDetails
//!      → DownloadingAttachments → Sorting → Persisting → Verifying → Idle
//! ```
//!
//! Each stage takes the working set by value and hands back the updated set.
//! Only `Persisting` touches the snapshot file, once, at the end; a run that
//! fails or is abandoned earlier leaves the previous snapshot untouched.
//!
//! Runs are serialized twice over: an async mutex queues triggers sharing one
//! pipeline, and the store's file lock queues runs from other processes on
//! the same snapshot (a `serve` process next to a manual `isx_news run`).

use crate::attachments::AttachmentManager;
use crate::error::PipelineError;
use crate::merge::merge;
use crate::models::{NewsItem, RunSummary};
use crate::scrapers::PageFetcher;
use crate::scrapers::detail::DetailParser;
use crate::store::RecordStore;
use crate::utils::truncate_for_log;
use futures::stream::{self, StreamExt};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, instrument, warn};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    GatheringListing,
    Reconciling,
    FetchingDetails,
    DownloadingAttachments,
    Sorting,
    Persisting,
    Verifying,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::GatheringListing => "gathering_listing",
            Stage::Reconciling => "reconciling",
            Stage::FetchingDetails => "fetching_details",
            Stage::DownloadingAttachments => "downloading_attachments",
            Stage::Sorting => "sorting",
            Stage::Persisting => "persisting",
            Stage::Verifying => "verifying",
        };
        f.write_str(name)
    }
}

/// Static knobs for a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Listing pages crawled on every run, in order.
    pub source_pages: Vec<String>,
    /// Finds attachments under the configured prefix in detail pages.
    pub detail_parser: DetailParser,
    /// Detail pages fetched in parallel.
    pub detail_concurrency: usize,
}

pub struct IngestionPipeline {
    fetcher: Arc<dyn PageFetcher>,
    store: RecordStore,
    attachments: AttachmentManager,
    settings: PipelineSettings,
    run_lock: Mutex<()>,
    stage: watch::Sender<Stage>,
}

impl fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("store", &self.store)
            .field("attachments", &self.attachments)
            .field("settings", &self.settings)
            .field("stage", &*self.stage.borrow())
            .finish()
    }
}

/// Restores `Idle` when a run ends, including when its future is dropped.
struct IdleOnDrop<'a>(&'a watch::Sender<Stage>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(Stage::Idle);
    }
}

impl IngestionPipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: RecordStore,
        attachments: AttachmentManager,
        settings: PipelineSettings,
    ) -> Self {
        let (stage, _) = watch::channel(Stage::Idle);
        Self {
            fetcher,
            store,
            attachments,
            settings,
            run_lock: Mutex::new(()),
            stage,
        }
    }

    /// Observe stage transitions.
    pub fn subscribe_stage(&self) -> watch::Receiver<Stage> {
        self.stage.subscribe()
    }

    /// Items as currently persisted.
    pub async fn snapshot(&self) -> Result<Vec<NewsItem>, PipelineError> {
        debug!(path = %self.store.path().display(), "Reading snapshot");
        Ok(self.store.load().await?)
    }

    /// Attachment report for the persisted snapshot.
    pub async fn verify(&self) -> Result<BTreeMap<String, Vec<String>>, PipelineError> {
        let items = self.store.load().await?;
        Ok(self.attachments.verify_all(&items).await)
    }

    fn enter(&self, stage: Stage) {
        debug!(%stage, "Entering stage");
        self.stage.send_replace(stage);
    }

    /// Execute one full run.
    ///
    /// Concurrent callers queue behind the run mutex, then behind the
    /// snapshot lock, which is held from the initial load until the run
    /// ends. Every run therefore merges against the snapshot the previous
    /// run wrote.
    ///
    /// # Returns
    ///
    /// A [`RunSummary`] with item counts, the number of files downloaded and
    /// the attachments still missing on disk.
    ///
    /// # Errors
    ///
    /// Only snapshot lock, read or write failures fail the run. Page, item
    /// and attachment failures are logged and degrade that unit alone.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let _guard = self.run_lock.lock().await;
        let _idle = IdleOnDrop(&self.stage);
        let t0 = Instant::now();
        info!("Ingestion run starting");

        let store_lock = self.store.lock().await?;
        // Read the snapshot first: an unreadable store aborts before any crawling.
        let existing = self.store.load().await?;

        self.enter(Stage::GatheringListing);
        let observed = self.gather_listing().await;

        if existing.is_empty() && observed.is_empty() {
            warn!("No listing rows and no snapshot; nothing to reconcile");
            return Ok(RunSummary::default());
        }

        self.enter(Stage::Reconciling);
        let merged = merge(existing, observed);
        let new_count = merged.iter().filter(|i| i.is_new).count();

        self.enter(Stage::FetchingDetails);
        let enriched = self.fetch_details(merged).await;

        self.enter(Stage::DownloadingAttachments);
        let (downloaded_items, downloaded) = self.download_attachments(enriched).await;

        self.enter(Stage::Sorting);
        let sorted = sort_by_date_desc(downloaded_items);

        self.enter(Stage::Persisting);
        if let Err(e) = store_lock.save(&sorted).await {
            error!(error = %e, "Failed to persist snapshot; previous snapshot kept");
            return Err(e.into());
        }

        self.enter(Stage::Verifying);
        let missing_attachments = self.attachments.verify_all(&sorted).await;

        let summary = RunSummary {
            item_count: sorted.len(),
            new_count,
            downloaded,
            missing_attachments,
        };
        info!(
            items = summary.item_count,
            new = summary.new_count,
            downloaded = summary.downloaded,
            missing = summary.missing_attachments.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Ingestion run complete"
        );
        Ok(summary)
    }

    /// Concatenate every source page's rows; a failing page contributes nothing.
    async fn gather_listing(&self) -> Vec<NewsItem> {
        let mut observed = Vec::new();
        let pages = self.settings.source_pages.len();

        for (i, page) in self.settings.source_pages.iter().enumerate() {
            match self.fetcher.fetch_listing(page).await {
                Ok(rows) => {
                    info!(page = i + 1, pages, count = rows.len(), "Fetched listing page");
                    observed.extend(rows.into_iter().map(NewsItem::from));
                }
                Err(e) => {
                    error!(page = i + 1, pages, url = %page, error = %e, "Listing page failed; skipping");
                }
            }
        }

        info!(count = observed.len(), "Gathered listing");
        observed
    }

    /// Enrich items first seen in this run with ticker and attachment references.
    async fn fetch_details(&self, items: Vec<NewsItem>) -> Vec<NewsItem> {
        let pending = items.iter().filter(|i| i.is_new).count();
        if pending == 0 {
            info!("No new items; skipping detail retrieval");
            return items;
        }
        info!(pending, "Fetching details for new items");

        let fetcher = &self.fetcher;
        let parser = &self.settings.detail_parser;

        stream::iter(items)
            .map(|item| async move {
                if !item.is_new {
                    return item;
                }
                match fetcher.fetch_detail(&item.link).await {
                    Ok(html) => {
                        let detail = parser.parse(&html);
                        if detail.ticker.is_empty() {
                            debug!(
                                link = %item.link,
                                preview = %truncate_for_log(&html, 200),
                                "No ticker in detail page"
                            );
                        }
                        info!(
                            title = %item.title,
                            ticker = %detail.ticker,
                            attachments = detail.attachments.len(),
                            "Fetched item details"
                        );
                        NewsItem {
                            ticker: detail.ticker,
                            attachments: detail.attachments,
                            ..item
                        }
                    }
                    Err(e) => {
                        warn!(title = %item.title, link = %item.link, error = %e, "Detail fetch failed; keeping bare item");
                        item
                    }
                }
            })
            .buffered(self.settings.detail_concurrency.max(1))
            .collect()
            .await
    }

    /// Bring every item's attachments up to date, new or previously known.
    async fn download_attachments(&self, items: Vec<NewsItem>) -> (Vec<NewsItem>, usize) {
        let mut out = Vec::with_capacity(items.len());
        let mut downloaded = 0;

        for item in items {
            if item.attachments.iter().all(|a| a.is_loaded) {
                out.push(item);
                continue;
            }
            let (item, n) = self.attachments.ensure_downloaded(item).await;
            downloaded += n;
            out.push(item);
        }

        info!(downloaded, "Attachment pass complete");
        (out, downloaded)
    }
}

/// Most recent first; unparsable dates after every parsable one.
///
/// The sort is stable, so equal timestamps and unparsable dates keep their
/// relative order and sorting a sorted set is a no-op.
pub fn sort_by_date_desc(mut items: Vec<NewsItem>) -> Vec<NewsItem> {
    let unparsable = items.iter().filter(|i| i.published_at().is_none()).count();
    if unparsable > 0 {
        debug!(unparsable, "Items with unparsable dates sort last");
    }
    items.sort_by_cached_key(|i| {
        let at = i.published_at();
        (at.is_none(), at.map(Reverse))
    });
    items
}
