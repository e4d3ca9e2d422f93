//! # ISX News
//!
//! Scheduled ingestion of market news from the Iraq Stock Exchange portal.
//!
//! Each run crawls the portal's story listings, reconciles them against a
//! CSV snapshot on disk, enriches stories seen for the first time with their
//! company ticker and PDF attachments, mirrors those PDFs locally and writes
//! the snapshot back, newest first.
//!
//! ## Usage
//!
//! ```sh
//! isx_news run      # one run, summary as JSON
//! isx_news serve    # business-hours schedule until Ctrl-C
//! isx_news list     # stored snapshot as JSON
//! isx_news verify   # attachments missing from disk
//! ```
//!
//! ## Architecture
//!
//! 1. **Listing**: fetch every source page through a [`scrapers::PageFetcher`]
//! 2. **Reconcile**: merge with the stored snapshot, keyed by link
//! 3. **Details**: ticker and attachments for new stories only
//! 4. **Attachments**: download anything not yet on disk
//! 5. **Persist**: sort newest first, replace the snapshot atomically, verify

use clap::Parser;
use reqwest::Client;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod attachments;
mod cli;
mod config;
mod error;
mod merge;
mod models;
mod pipeline;
mod scheduler;
mod scrapers;
mod store;
mod utils;

use attachments::AttachmentManager;
use cli::{Cli, Command};
use config::Config;
use error::ConfigError;
use pipeline::{IngestionPipeline, PipelineSettings, Stage};
use scheduler::Scheduler;
use scrapers::detail::DetailParser;
use scrapers::isx::HttpPageFetcher;
use scrapers::retry::RetryFetcher;
use store::RecordStore;
use utils::ensure_writable_dir;

/// Everything a command needs, wired once from the configuration.
struct App {
    config: Config,
    pipeline: Arc<IngestionPipeline>,
    cancel: CancellationToken,
}

impl App {
    #[instrument(level = "info", skip_all)]
    fn init(config: Config) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        let portal_url = config.portal_url();
        let http = HttpPageFetcher::new(client.clone(), &portal_url)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let fetcher = RetryFetcher::new(
            http,
            config.fetch.max_retries,
            Duration::from_millis(config.fetch.retry_base_delay_ms),
        );

        let store = RecordStore::new(config.snapshot_path.clone(), portal_url.clone());
        let attachments = AttachmentManager::new(
            client,
            config.base_url.clone(),
            config.attachment_dir.clone(),
        );
        let detail_parser = DetailParser::new(&config.attachment_prefix)
            .map_err(|e| ConfigError::Invalid(format!("attachment_prefix: {e}")))?;
        let settings = PipelineSettings {
            source_pages: config.source_pages.clone(),
            detail_parser,
            detail_concurrency: config.fetch.detail_concurrency,
        };

        info!(
            portal = %portal_url,
            snapshot = %config.snapshot_path.display(),
            attachments = %config.attachment_dir.display(),
            pages = config.source_pages.len(),
            "Pipeline initialized"
        );

        Ok(Self {
            pipeline: Arc::new(IngestionPipeline::new(
                Arc::new(fetcher),
                store,
                attachments,
                settings,
            )),
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Fail fast if the output locations cannot be written.
    async fn check_outputs(&self) -> Result<(), Box<dyn Error>> {
        ensure_writable_dir(&self.config.attachment_dir).await?;
        match self.config.snapshot_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => ensure_writable_dir(parent).await?,
            _ => {}
        }
        Ok(())
    }

    async fn run_once(&self) -> Result<(), Box<dyn Error>> {
        self.check_outputs().await?;
        let summary = self.pipeline.run().await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    }

    async fn serve(&self) -> Result<(), Box<dyn Error>> {
        self.check_outputs().await?;
        let scheduler = Scheduler::new(self.config.business_hours()?, self.config.interval());
        info!(
            zone = %self.config.schedule.timezone,
            open_hour = self.config.schedule.open_hour,
            close_hour = self.config.schedule.close_hour,
            closed_days = ?self.config.schedule.closed_days,
            "Serving on schedule; Ctrl-C to stop"
        );
        let handle = scheduler.spawn(Arc::clone(&self.pipeline), self.cancel.clone());

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C; shutting down");
        }
        self.shutdown(handle).await;
        Ok(())
    }

    async fn shutdown(&self, handle: JoinHandle<()>) {
        let stage = *self.pipeline.subscribe_stage().borrow();
        if stage != Stage::Idle {
            warn!(%stage, "Stopping during a run; snapshot left at its previous state");
        }
        self.cancel.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
        info!("Shutdown complete");
    }

    async fn list(&self) -> Result<(), Box<dyn Error>> {
        let items = self.pipeline.snapshot().await?;
        debug!(count = items.len(), "Loaded snapshot");
        println!("{}", serde_json::to_string_pretty(&items)?);
        Ok(())
    }

    async fn verify(&self) -> Result<(), Box<dyn Error>> {
        let missing = self.pipeline.verify().await?;
        println!("{}", serde_json::to_string_pretty(&missing)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(path) = args.snapshot_path {
        config.snapshot_path = path;
    }
    if let Some(dir) = args.attachment_dir {
        config.attachment_dir = dir;
    }

    let app = App::init(config)?;
    let result = match args.command {
        Command::Run => app.run_once().await,
        Command::Serve => app.serve().await,
        Command::List => app.list().await,
        Command::Verify => app.verify().await,
    };

    let elapsed = start_time.elapsed();
    match &result {
        Ok(()) => info!(?elapsed, command = ?args.command, "Execution complete"),
        Err(e) => error!(?elapsed, command = ?args.command, error = %e, "Execution failed"),
    }
    result
}
