//! Poster unit: captions today's pending records and publishes them.
//!
//! The only hand-off from the scraping unit is the record store's status
//! column. A record becomes `posted` only after the publisher confirms the
//! post; every other outcome leaves it pending for the next sweep.

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::api::{DEFAULT_MAX_TOKENS, TextGenerator};
use crate::error::Result;
use crate::models::StoredRecord;
use crate::prompt::caption_prompt;
use crate::publish::Publisher;
use crate::store::RecordStore;
use crate::utils::{pause, truncate_for_log};

#[derive(Debug, Clone)]
pub struct PosterSettings {
    pub max_tokens: u32,
    /// Wait after each record that reached the generator.
    pub post_interval: Duration,
    /// Wait when nothing is pending, or the pending query failed.
    pub idle: Duration,
}

impl Default for PosterSettings {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            post_interval: Duration::from_secs(18),
            idle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Posted,
    /// Booking date is not today.
    Skipped,
    /// Generator returned nothing; left pending.
    NoCaption,
    /// Publisher or status update failed; left pending.
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub pending: usize,
    pub posted: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Poster {
    store: Arc<dyn RecordStore>,
    generator: Arc<dyn TextGenerator>,
    publisher: Arc<dyn Publisher>,
    settings: PosterSettings,
    cancel: CancellationToken,
}

impl Poster {
    /// Create the posting unit.
    ///
    /// # Arguments
    ///
    /// * `store` - Source of pending records and sink for `posted` marks
    /// * `generator` - Caption writer
    /// * `publisher` - Page the captions and photos go to
    /// * `settings` - Intervals and the caption token limit
    /// * `cancel` - Ends the sweep loop and any wait inside it
    pub fn new(
        store: Arc<dyn RecordStore>,
        generator: Arc<dyn TextGenerator>,
        publisher: Arc<dyn Publisher>,
        settings: PosterSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            generator,
            publisher,
            settings,
            cancel,
        }
    }

    /// Caption and publish a single record.
    #[instrument(level = "info", skip(self, stored), fields(id = stored.id))]
    pub async fn post_one(&self, stored: &StoredRecord, today: NaiveDate) -> PostOutcome {
        let record = &stored.record;
        if record.date_of_booking != today {
            warn!(date = %record.date_of_booking, %today, "Skipping record as it's not from today");
            return PostOutcome::Skipped;
        }

        let prompt = caption_prompt(record);
        let caption = self.generator.complete(&prompt, self.settings.max_tokens).await;
        if caption.trim().is_empty() {
            warn!("No caption generated; leaving record pending");
            return PostOutcome::NoCaption;
        }
        info!(caption = %truncate_for_log(&caption, 120), "Generated content successfully");

        if !self.publisher.publish(&caption, &record.image_url).await {
            error!("Failed to post record; not marking as posted");
            return PostOutcome::Failed;
        }

        match self.store.mark_posted(stored.id).await {
            Ok(()) => {
                info!("Record processed and posted successfully");
                PostOutcome::Posted
            }
            Err(e) => {
                error!(error = %e, "Posted, but failed to mark record as posted");
                PostOutcome::Failed
            }
        }
    }

    /// Post every record pending for `today`, pacing between posts.
    pub async fn sweep(&self, today: NaiveDate) -> Result<SweepReport> {
        let pending = self.store.list_pending_for_date(today).await?;
        let mut report = SweepReport {
            pending: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            info!(%today, "No new records found for today. Waiting for new data...");
            return Ok(report);
        }

        for stored in &pending {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.post_one(stored, today).await {
                PostOutcome::Posted => report.posted += 1,
                PostOutcome::Skipped => {
                    report.skipped += 1;
                    continue;
                }
                PostOutcome::NoCaption | PostOutcome::Failed => report.failed += 1,
            }
            if pause(&self.cancel, self.settings.post_interval).await.is_err() {
                break;
            }
        }
        Ok(report)
    }

    #[instrument(level = "info", name = "poster", skip_all)]
    pub async fn run(self) {
        info!("Poster starting");

        while !self.cancel.is_cancelled() {
            let today = Local::now().date_naive();
            let idle = match self.sweep(today).await {
                Ok(report) => {
                    if report.pending > 0 {
                        info!(
                            pending = report.pending,
                            posted = report.posted,
                            skipped = report.skipped,
                            failed = report.failed,
                            "Posting sweep completed"
                        );
                    }
                    report.pending == 0
                }
                Err(e) => {
                    error!(error = %e, detail = ?e, "Error loading pending records");
                    true
                }
            };
            if idle && pause(&self.cancel, self.settings.idle).await.is_err() {
                break;
            }
        }

        info!("Poster shutting down");
    }
}
