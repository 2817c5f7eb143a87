//! Data models for booking listings and the records built from them.
//!
//! - [`ScrapeTarget`]: which site/county is scraped, fixed at startup
//! - [`ArticleSummary`] / [`ListingPage`]: what one listing page yields
//! - [`BookingTitle`]: the `"<First> <Last...> <MM/DD/YYYY>"` title convention
//! - [`ParsedRecord`] / [`StoredRecord`]: a booking before and after insert

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::{Result, ScrapeError};

static DATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}/\d{1,2}/\d{4}$").expect("valid date regex"));

/// The jurisdiction being scraped and where its listing lives.
#[derive(Debug, Clone)]
pub struct ScrapeTarget {
    pub state: String,
    pub county: String,
    pub base_url: Url,
}

impl ScrapeTarget {
    pub fn new(state: impl Into<String>, county: impl Into<String>, base_url: Url) -> Self {
        Self {
            state: state.into(),
            county: county.into(),
            base_url,
        }
    }

    /// Listing URL for a month: `{base}/{YYYY}/{MM}/`, with `page/{n}/`
    /// appended after the first page.
    pub fn listing_url(&self, year: i32, month: u32, page: u32) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let month_url = format!("{base}/{year}/{month:02}/");
        if page <= 1 {
            month_url
        } else {
            format!("{month_url}page/{page}/")
        }
    }
}

impl fmt::Display for ScrapeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} County, {} ({})", self.county, self.state, self.base_url)
    }
}

/// One entry of a listing page: where the article lives and its raw title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSummary {
    pub url: String,
    pub title: String,
}

/// The articles found on one page of a monthly listing, in page order.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub number: u32,
    pub articles: Vec<ArticleSummary>,
}

impl ListingPage {
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

/// A title split into its natural-key parts.
///
/// The leading token is the first name, the trailing token the booking date,
/// and everything between is the last name. Apostrophes are dropped from both
/// names so listing titles and article headings yield the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingTitle {
    pub first_name: String,
    pub last_name: String,
    pub booking_date: NaiveDate,
    /// The date exactly as written in the title, e.g. `08/24/2024`.
    pub date_token: String,
}

impl BookingTitle {
    pub fn parse(title: &str) -> Result<Self> {
        let tokens: Vec<&str> = title.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(ScrapeError::parse(format!(
                "title needs first name, last name and date: {title:?}"
            )));
        }

        let date_token = tokens[tokens.len() - 1];
        if !DATE_TOKEN.is_match(date_token) {
            return Err(ScrapeError::parse(format!(
                "title does not end in MM/DD/YYYY: {title:?}"
            )));
        }
        let booking_date = NaiveDate::parse_from_str(date_token, "%m/%d/%Y")
            .map_err(|e| ScrapeError::parse(format!("bad booking date {date_token:?}: {e}")))?;

        let first_name = strip_apostrophes(tokens[0]);
        let last_name = strip_apostrophes(&tokens[1..tokens.len() - 1].join(" "));
        if first_name.is_empty() || last_name.is_empty() {
            return Err(ScrapeError::parse(format!("empty name in title: {title:?}")));
        }

        Ok(Self {
            first_name,
            last_name,
            booking_date,
            date_token: date_token.to_string(),
        })
    }
}

fn strip_apostrophes(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '\'' | '\u{2019}')).collect()
}

/// Where a record sits in the posting workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Pending,
    Posted,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Posted => "posted",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "posted" => Ok(Self::Posted),
            other => Err(ScrapeError::parse(format!("unknown status {other:?}"))),
        }
    }
}

/// A booking extracted from one article, ready for the record store.
///
/// Only built after the mugshot upload has succeeded, so `image_url` always
/// points at the blob store copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub first_name: String,
    pub last_name: String,
    pub date_of_booking: NaiveDate,
    pub offense_description: String,
    pub additional_details: String,
    pub image_url: String,
    pub state_of_booking: String,
    pub county_of_booking: String,
    pub status: ProcessingStatus,
}

/// A record as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub record: ParsedRecord,
}
