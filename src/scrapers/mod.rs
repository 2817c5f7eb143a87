//! Booking-site scraping pipeline.
//!
//! A month pass flows through these submodules:
//!
//! | Step | Module | Role |
//! |------|--------|------|
//! | 1 | [`listing`] | Walk listing pages and decide when to stop |
//! | 2 | [`dedupe`] | Skip natural keys already in the record store |
//! | 3 | [`article`] | Fetch an article, store its mugshot and record |
//! | - | [`markup`] | All knowledge of the site's HTML structure |
//!
//! HTTP goes through [`crate::session::Fetch`], so the whole pipeline runs
//! against canned pages in tests.

pub mod article;
pub mod dedupe;
pub mod listing;
pub mod markup;
