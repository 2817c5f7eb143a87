//! Listing paginator for one month of bookings.
//!
//! The listing is newest first, so a pass walks pages until one of:
//!
//! | Stop | Why |
//! |------|-----|
//! | [`MonthOutcome::EndOfListing`] | a page has no articles |
//! | [`MonthOutcome::ReachedPastDate`] | an article is booked before today |
//! | [`MonthOutcome::Saturated`] | a page had nothing new |
//! | [`MonthOutcome::Cancelled`] | shutdown was requested |
//!
//! Articles dated after today are skipped, not treated as a boundary.

use chrono::{Datelike, Local, NaiveDate};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::{Result, ScrapeError};
use crate::models::{ArticleSummary, BookingTitle, ListingPage, ScrapeTarget};
use crate::scrapers::article::{Extraction, Extractor};
use crate::scrapers::dedupe::DuplicateFilter;
use crate::scrapers::markup::Markup;
use crate::session::Fetch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthOutcome {
    EndOfListing,
    ReachedPastDate,
    Saturated,
    Cancelled,
}

/// What one month pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthReport {
    pub outcome: MonthOutcome,
    pub pages: u32,
    pub stored: u32,
    pub duplicates: u32,
    pub skipped: u32,
}

impl MonthReport {
    fn new() -> Self {
        Self {
            outcome: MonthOutcome::EndOfListing,
            pages: 0,
            stored: 0,
            duplicates: 0,
            skipped: 0,
        }
    }

    fn finish(mut self, outcome: MonthOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

pub struct Paginator {
    target: ScrapeTarget,
    markup: Arc<dyn Markup>,
    filter: DuplicateFilter,
    extractor: Extractor,
    cancel: CancellationToken,
}

impl Paginator {
    /// # Arguments
    ///
    /// * `target` - Site whose monthly listing is walked
    /// * `markup` - Listing page parser
    /// * `filter` - Title-level duplicate check, run before any article fetch
    /// * `extractor` - Handles each new article
    /// * `cancel` - Checked between articles and pages
    pub fn new(
        target: ScrapeTarget,
        markup: Arc<dyn Markup>,
        filter: DuplicateFilter,
        extractor: Extractor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            markup,
            filter,
            extractor,
            cancel,
        }
    }

    /// Scrape the listing for the current local month.
    pub async fn scrape_current_month(&self, fetch: &mut dyn Fetch) -> Result<MonthReport> {
        let today = Local::now().date_naive();
        self.scrape_month(fetch, today.year(), today.month(), today).await
    }

    /// Walk the `year`/`month` listing, extracting bookings dated `today`.
    ///
    /// A listing page that cannot be fetched ends the pass with an error;
    /// failures on individual articles are logged and skipped.
    #[instrument(level = "info", skip(self, fetch), fields(target = %self.target))]
    pub async fn scrape_month(
        &self,
        fetch: &mut dyn Fetch,
        year: i32,
        month: u32,
        today: NaiveDate,
    ) -> Result<MonthReport> {
        let mut report = MonthReport::new();
        let mut page_number = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(report.finish(MonthOutcome::Cancelled));
            }

            let page_url = self.target.listing_url(year, month, page_number);
            info!(url = %page_url, "Scraping listing page");
            let page = match self.fetch_page(fetch, &page_url, page_number).await {
                Ok(page) => page,
                Err(e) if e.is_cancelled() => return Ok(report.finish(MonthOutcome::Cancelled)),
                Err(e) => {
                    error!(url = %page_url, error = %e, "Failed to fetch listing page");
                    return Err(e);
                }
            };
            report.pages += 1;

            if page.is_empty() {
                info!(page = page.number, "No more articles found; ending scrape");
                return Ok(report.finish(MonthOutcome::EndOfListing));
            }
            info!(count = page.articles.len(), page = page.number, "Found articles");

            let mut new_found = false;
            for article in &page.articles {
                if self.cancel.is_cancelled() {
                    return Ok(report.finish(MonthOutcome::Cancelled));
                }

                let title = match BookingTitle::parse(&article.title) {
                    Ok(title) => title,
                    Err(e) => {
                        warn!(
                            title = %article.title,
                            url = %article.url,
                            error = %e,
                            "Skipping malformed article title"
                        );
                        report.skipped += 1;
                        continue;
                    }
                };

                if title.booking_date > today {
                    warn!(
                        date = %title.booking_date,
                        title = %article.title,
                        "Found future booking date; skipping"
                    );
                    report.skipped += 1;
                    continue;
                }
                if title.booking_date < today {
                    info!(
                        date = %title.booking_date,
                        "Found booking from before today; stopping scrape"
                    );
                    return Ok(report.finish(MonthOutcome::ReachedPastDate));
                }

                if self
                    .filter
                    .seen(&title.first_name, &title.last_name, title.booking_date)
                    .await
                {
                    info!(
                        first = %title.first_name,
                        last = %title.last_name,
                        "Mugshot already in database"
                    );
                    report.duplicates += 1;
                    continue;
                }

                new_found = true;
                match self.extractor.extract(fetch, &article.url).await {
                    Ok(Extraction::Stored { id, record }) => {
                        debug!(
                            id,
                            page = page.number,
                            date = %record.date_of_booking,
                            "Queued booking for posting"
                        );
                        report.stored += 1;
                    }
                    Ok(Extraction::AlreadyStored) => report.duplicates += 1,
                    Err(e) if e.is_cancelled() => {
                        return Ok(report.finish(MonthOutcome::Cancelled));
                    }
                    Err(e) => {
                        log_article_failure(article, &e);
                        report.skipped += 1;
                    }
                }
            }

            if !new_found {
                info!(page = page.number, "No new mugshots on this page; stopping scrape");
                return Ok(report.finish(MonthOutcome::Saturated));
            }
            page_number += 1;
        }
    }

    async fn fetch_page(
        &self,
        fetch: &mut dyn Fetch,
        url: &str,
        number: u32,
    ) -> Result<ListingPage> {
        let page_url = Url::parse(url)
            .map_err(|e| ScrapeError::Config(format!("bad listing URL {url}: {e}")))?;
        let body = fetch.fetch(url).await?;
        let articles = self.markup.listing(&String::from_utf8_lossy(&body), &page_url);
        Ok(ListingPage { number, articles })
    }
}

fn log_article_failure(article: &ArticleSummary, e: &ScrapeError) {
    let (url, title) = (&article.url, &article.title);
    match e {
        ScrapeError::Upload(_) | ScrapeError::Transform(_) => {
            warn!(%url, %title, error = %e, "Image not stored; record discarded")
        }
        ScrapeError::Parse(_) => {
            warn!(%url, %title, error = %e, "Unexpected article markup; record skipped")
        }
        _ => error!(%url, %title, error = %e, "Error processing article"),
    }
}
