//! Tracing subscriber setup.
//!
//! Every event goes to three fmt layers that share one `EnvFilter`:
//! - the console, with ANSI colours
//! - the dashboard [`LogFeed`], plain text
//! - `mugshot_scraper.log` in the log directory, rotated daily with the three
//!   newest files kept

use std::error::Error;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use crate::dashboard::LogFeed;
use crate::error::{Result, ScrapeError};

const LOG_FILE_PREFIX: &str = "mugshot_scraper";
const LOG_FILE_SUFFIX: &str = "log";
const LOG_FILES_KEPT: usize = 3;

/// Daily-rotating appender for `{dir}/mugshot_scraper.<date>.log`.
///
/// # Errors
///
/// Returns [`ScrapeError::Config`] when the directory cannot be created or
/// written.
pub fn file_appender(dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)
        .map_err(|e| {
            ScrapeError::Config(format!("cannot open log directory {}: {e}", dir.display()))
        })
}

/// Install the global subscriber.
///
/// # Arguments
///
/// * `feed` - Channel the dashboard layer writes into
/// * `log_dir` - Directory for the rotated log files
///
/// # Returns
///
/// The guard of the file writer's background thread. Buffered lines are
/// flushed when it is dropped, so `main` keeps it alive until exit.
pub fn init_tracing(
    feed: LogFeed,
    log_dir: &Path,
) -> std::result::Result<WorkerGuard, Box<dyn Error>> {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());
    let dashboard = tfmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(feed);
    let file = tfmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(dashboard)
        .with(file)
        .try_init()?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_file_appender_writes_prefixed_log() {
        let dir = scratch_dir("mugshot-logs");
        {
            let mut appender = file_appender(&dir).unwrap();
            appender.write_all(b"Scraper starting\n").unwrap();
            appender.flush().unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("mugshot_scraper."));
        assert!(names[0].ends_with(".log"));

        let body = std::fs::read_to_string(dir.join(&names[0])).unwrap();
        assert_eq!(body, "Scraper starting\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unusable_log_dir_is_config_error() {
        let dir = scratch_dir("mugshot-logs-file");
        std::fs::write(&dir, b"not a directory").unwrap();

        let err = file_appender(&dir.join("nested")).unwrap_err();
        assert!(matches!(err, ScrapeError::Config(_)));
        let _ = std::fs::remove_file(&dir);
    }
}
