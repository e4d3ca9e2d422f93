//! Business-hours gated scheduling of ingestion runs.
//!
//! The crawl is only worth doing while the exchange publishes, so every tick
//! first asks [`BusinessHours::is_open_at`]. The weekday and the hour are both
//! evaluated in the market's own zone, not the host's.
//!
//! Runs execute inline on the scheduler task, so they never overlap. Ticks
//! that fall due during a slow run are skipped rather than queued.

use crate::pipeline::IngestionPipeline;
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Trading-window predicate in a fixed market time zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessHours {
    /// Zone name, for logs only; `offset` is authoritative.
    pub zone: String,
    pub offset: FixedOffset,
    /// Local weekdays on which the market is closed.
    pub closed_days: Vec<Weekday>,
    /// First open hour, inclusive.
    pub open_hour: u32,
    /// First closed hour, exclusive upper bound of the window.
    pub close_hour: u32,
}

impl BusinessHours {
    /// True when `now`, seen in the market zone, is on an open day within
    /// `[open_hour, close_hour)`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        if self.closed_days.contains(&local.weekday()) {
            return false;
        }
        let hour = local.hour();
        hour >= self.open_hour && hour < self.close_hour
    }

    pub fn is_open_now(&self) -> bool {
        self.is_open_at(Utc::now())
    }
}

/// Recurring trigger for [`IngestionPipeline::run`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    hours: BusinessHours,
    every: Duration,
}

impl Scheduler {
    pub fn new(hours: BusinessHours, every: Duration) -> Self {
        Self { hours, every }
    }

    /// Spawn the tick loop. It exits once `cancel` fires.
    pub fn spawn(
        self,
        pipeline: Arc<IngestionPipeline>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(pipeline, cancel))
    }

    /// Run immediately if the market is open, then on every interval tick.
    ///
    /// Run failures are logged and never end the loop. Cancellation abandons
    /// an in-flight run; the snapshot is only replaced atomically at the end
    /// of a run, so the previous one stays valid.
    #[instrument(level = "info", skip_all, fields(zone = %self.hours.zone, every_secs = self.every.as_secs()))]
    pub async fn run(self, pipeline: Arc<IngestionPipeline>, cancel: CancellationToken) {
        info!("Scheduler started");

        let mut ticker = interval_at(Instant::now() + self.every, self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.hours.is_open_now() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Shutdown requested; abandoning in-flight run");
                        break;
                    }
                    result = pipeline.run() => match result {
                        Ok(summary) => info!(
                            items = summary.item_count,
                            new = summary.new_count,
                            "Scheduled run finished"
                        ),
                        Err(e) => error!(error = %e, "Scheduled run failed; waiting for next tick"),
                    },
                }
            } else {
                debug!("Outside business hours; skipping tick");
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        info!("Scheduler stopped");
    }
}
