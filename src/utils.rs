//! Helpers for text cleanup, filenames, randomized delays, and cancellable sleeps.
//!
//! Every long wait in the crate goes through [`pause`] or [`pause_in_slices`]
//! so that a shutdown request is observed at the sleep point rather than after
//! the full delay.

use rand::{Rng, rng};
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, ScrapeError};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a char boundary) with an
/// ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Blob filename for a booking mugshot.
///
/// Names keep only alphanumeric characters and the date's slashes become
/// dashes, so `("Jo'hn", "O'Brien", "08/24/2024")` maps to
/// `John_OBrien_08-24-2024.jpg`.
pub fn generate_filename(first_name: &str, last_name: &str, date: &str) -> String {
    let safe_first: String = first_name.chars().filter(|c| c.is_alphanumeric()).collect();
    let safe_last: String = last_name.chars().filter(|c| c.is_alphanumeric()).collect();
    let safe_date = date.replace('/', "-");
    format!("{safe_first}_{safe_last}_{safe_date}.jpg")
}

/// Uniformly random duration within `range` (both ends in seconds).
pub fn random_delay(range: &RangeInclusive<Duration>) -> Duration {
    let (lo, hi) = (range.start().as_secs_f64(), range.end().as_secs_f64());
    if hi <= lo {
        return *range.start();
    }
    Duration::from_secs_f64(rng().random_range(lo..=hi))
}

/// Sleep for `delay`, returning [`ScrapeError::Cancelled`] if `cancel` fires first.
pub async fn pause(cancel: &CancellationToken, delay: Duration) -> Result<()> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(ScrapeError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}

/// Sleep `total` in `slice`-sized steps, checking `cancel` between steps.
///
/// Returns `false` when the wait was cut short by shutdown.
pub async fn pause_in_slices(cancel: &CancellationToken, total: Duration, slice: Duration) -> bool {
    let slice = if slice.is_zero() { total } else { slice };
    let mut waited = Duration::ZERO;
    while waited < total {
        if cancel.is_cancelled() {
            return false;
        }
        let step = slice.min(total - waited);
        if pause(cancel, step).await.is_err() {
            return false;
        }
        waited += step;
    }
    debug!(?waited, "Idle wait complete");
    !cancel.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        let s = "é".repeat(10);
        let result = truncate_for_log(&s, 3);
        assert!(result.starts_with('é'));
        assert!(result.contains("(+18 bytes)"));
    }

    #[test]
    fn test_generate_filename() {
        assert_eq!(
            generate_filename("Jo'hn", "O'Brien", "08/24/2024"),
            "John_OBrien_08-24-2024.jpg"
        );
        assert_eq!(
            generate_filename("Mary", "Van Buren-Smith", "01/02/2025"),
            "Mary_VanBurenSmith_01-02-2025.jpg"
        );
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b   c "), "a b c");
        assert_eq!(normalize_whitespace("\n  \n"), "");
    }

    #[test]
    fn test_random_delay_stays_in_range() {
        let range = Duration::from_secs(2)..=Duration::from_secs(5);
        for _ in 0..100 {
            let d = random_delay(&range);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(5));
        }
        let fixed = Duration::ZERO..=Duration::ZERO;
        assert_eq!(random_delay(&fixed), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_returns_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = pause(&cancel, Duration::from_secs(60)).await;
        assert!(matches!(res, Err(ScrapeError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_in_slices_completes() {
        let cancel = CancellationToken::new();
        assert!(pause_in_slices(&cancel, Duration::from_secs(300), Duration::from_secs(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_in_slices_observes_stop() {
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(25)).await;
            stopper.cancel();
        });
        let started = tokio::time::Instant::now();
        assert!(!pause_in_slices(&cancel, Duration::from_secs(300), Duration::from_secs(10)).await);
        assert!(started.elapsed() < Duration::from_secs(40));
    }
}
