//! Error taxonomy shared by the scraper, the poster, and the adapters.
//!
//! The variants follow the propagation policy of the pipeline: anything scoped
//! to one article or record ([`ScrapeError::Parse`], [`ScrapeError::Upload`],
//! [`ScrapeError::Transform`]) is logged and skipped by the caller, while
//! network and status failures are retried by the session manager before they
//! surface. Only [`ScrapeError::Config`] is fatal.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ScrapeError>;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Connection failure, timeout, or unreadable body.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A response arrived with a non-2xx status.
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Markup or title text had an unexpected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The blob store rejected or failed an upload.
    #[error("upload failed: {0}")]
    Upload(String),

    /// Record store read/write failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The image could not be decoded, cropped, or re-encoded.
    #[error("image transform failed: {0}")]
    Transform(String),

    /// Missing or invalid settings at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Shutdown was requested while waiting.
    #[error("cancelled")]
    Cancelled,
}

impl ScrapeError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Failures worth another attempt: network errors and 5xx/429 statuses.
    ///
    /// The session manager retries every failed request regardless; this is
    /// used for the text generator, which gives up early on client errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transience() {
        let server = ScrapeError::Status { status: 503, url: "https://x".into() };
        let throttled = ScrapeError::Status { status: 429, url: "https://x".into() };
        let missing = ScrapeError::Status { status: 404, url: "https://x".into() };
        assert!(server.is_transient());
        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_record_scoped_errors_are_not_transient() {
        assert!(!ScrapeError::parse("bad title").is_transient());
        assert!(!ScrapeError::Upload("nope".into()).is_transient());
        assert!(!ScrapeError::Cancelled.is_transient());
        assert!(ScrapeError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_display_includes_context() {
        let e = ScrapeError::Status { status: 502, url: "https://jail.example/2024/08/".into() };
        assert_eq!(e.to_string(), "HTTP 502 for https://jail.example/2024/08/");
    }
}
