//! Article extractor: one booking page in, one stored record out.
//!
//! Steps for a single article:
//! 1. Fetch and parse the page through the [`Markup`] adapter
//! 2. Re-check the heading's natural key against the store
//! 3. Fetch the mugshot, crop the footer strip, upload it
//! 4. Insert the record, only once the upload has succeeded

use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

use crate::blob::BlobStore;
use crate::error::{Result, ScrapeError};
use crate::imaging::{FOOTER_STRIP_PX, ImageTransform};
use crate::models::{ParsedRecord, ProcessingStatus, ScrapeTarget};
use crate::scrapers::dedupe::DuplicateFilter;
use crate::scrapers::markup::Markup;
use crate::session::Fetch;
use crate::store::RecordStore;
use crate::utils::generate_filename;

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Stored { id: i64, record: ParsedRecord },
    /// The article heading resolved to a key that is already stored.
    AlreadyStored,
}

pub struct Extractor {
    target: ScrapeTarget,
    markup: Arc<dyn Markup>,
    images: Arc<dyn ImageTransform>,
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn RecordStore>,
    filter: DuplicateFilter,
}

impl Extractor {
    /// Build an extractor for one site.
    ///
    /// # Arguments
    ///
    /// * `target` - Site and jurisdiction stamped on every record
    /// * `markup` - Article page parser
    /// * `images` - Mugshot transform applied before upload
    /// * `blobs` - Destination for the transformed image
    /// * `store` - Record store; also backs the heading duplicate check
    pub fn new(
        target: ScrapeTarget,
        markup: Arc<dyn Markup>,
        images: Arc<dyn ImageTransform>,
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let filter = DuplicateFilter::new(store.clone());
        Self {
            target,
            markup,
            images,
            blobs,
            store,
            filter,
        }
    }

    /// Turn the article at `url` into a stored record.
    ///
    /// Every error is scoped to this article; the caller logs it and moves on.
    #[instrument(level = "info", skip(self, fetch))]
    pub async fn extract(&self, fetch: &mut dyn Fetch, url: &str) -> Result<Extraction> {
        let article_url = Url::parse(url)
            .map_err(|e| ScrapeError::parse(format!("bad article URL {url}: {e}")))?;
        let body = fetch.fetch(url).await?;
        let detail = self
            .markup
            .article(&String::from_utf8_lossy(&body), &article_url)?;
        let title = detail.title;

        if self
            .filter
            .seen(&title.first_name, &title.last_name, title.booking_date)
            .await
        {
            info!(
                first = %title.first_name,
                last = %title.last_name,
                "Article heading already stored"
            );
            return Ok(Extraction::AlreadyStored);
        }

        let image_url = detail.image_url.ok_or_else(|| {
            ScrapeError::parse(format!(
                "no mugshot image for {} {}",
                title.first_name, title.last_name
            ))
        })?;

        let raw = fetch.fetch(&image_url).await?;
        let images = self.images.clone();
        let cropped = tokio::task::spawn_blocking(move || images.crop(&raw, FOOTER_STRIP_PX))
            .await
            .map_err(|e| ScrapeError::Transform(format!("crop task failed: {e}")))??;

        let filename = generate_filename(&title.first_name, &title.last_name, &title.date_token);
        let public_url = self.blobs.upload(cropped, &filename, "image/jpeg").await?;

        let record = ParsedRecord {
            first_name: title.first_name,
            last_name: title.last_name,
            date_of_booking: title.booking_date,
            offense_description: detail.offense_description,
            additional_details: detail.additional_details,
            image_url: public_url,
            state_of_booking: self.target.state.clone(),
            county_of_booking: self.target.county.clone(),
            status: ProcessingStatus::Pending,
        };
        let id = self.store.insert(&record).await?;
        info!(
            id,
            first = %record.first_name,
            last = %record.last_name,
            date = %record.date_of_booking,
            "Successfully processed mugshot"
        );
        Ok(Extraction::Stored { id, record })
    }
}
