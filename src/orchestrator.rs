//! Scrape orchestrator: the long-running loop of the scraping unit.
//!
//! Each iteration runs one month pass, then idles in short slices so a stop
//! request is noticed within one slice. A pass that fails is logged and
//! followed by a shorter cooldown; nothing a pass does can end the loop
//! except shutdown.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::scrapers::listing::{MonthOutcome, MonthReport, Paginator};
use crate::session::Fetch;
use crate::utils::pause_in_slices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopping,
}

/// Wait lengths between passes.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Idle time after a completed pass.
    pub idle: Duration,
    /// Idle time after a failed pass.
    pub cooldown: Duration,
    /// Granularity at which the stop signal is checked while idle.
    pub slice: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(300),
            cooldown: Duration::from_secs(60),
            slice: Duration::from_secs(10),
        }
    }
}

pub struct Orchestrator {
    paginator: Paginator,
    fetch: Box<dyn Fetch>,
    timing: Timing,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create the scraping loop.
    ///
    /// # Arguments
    ///
    /// * `paginator` - Runs one month pass
    /// * `fetch` - Transport for every page and image request
    /// * `timing` - Idle, cooldown and slice lengths
    /// * `cancel` - The scraper's own token; pass a child of the process
    ///   token so [`Orchestrator::stop`] leaves the other units running
    pub fn new(
        paginator: Paginator,
        fetch: Box<dyn Fetch>,
        timing: Timing,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            paginator,
            fetch,
            timing,
            cancel,
        }
    }

    pub fn state(&self) -> RunState {
        if self.cancel.is_cancelled() {
            RunState::Stopping
        } else {
            RunState::Running
        }
    }

    /// Ask the loop to exit at its next check point.
    pub fn stop(&self) {
        info!("Stopping scraper");
        self.cancel.cancel();
    }

    /// One month pass over the current month.
    pub async fn run_once(&mut self) -> Result<MonthReport> {
        self.paginator.scrape_current_month(self.fetch.as_mut()).await
    }

    #[instrument(level = "info", name = "scraper", skip_all)]
    pub async fn run(mut self) {
        info!("Scraper starting");

        while self.state() == RunState::Running {
            info!("Starting scraping pass");
            let wait = match self.run_once().await {
                Ok(report) => {
                    info!(
                        outcome = ?report.outcome,
                        pages = report.pages,
                        stored = report.stored,
                        duplicates = report.duplicates,
                        skipped = report.skipped,
                        "Scraping pass completed"
                    );
                    if report.outcome == MonthOutcome::Cancelled {
                        break;
                    }
                    self.timing.idle
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    error!(error = %e, detail = ?e, "Error during scraping pass");
                    self.timing.cooldown
                }
            };

            info!(?wait, "Sleeping before next scrape");
            if !pause_in_slices(&self.cancel, wait, self.timing.slice).await {
                break;
            }
        }

        info!("Scraper shutting down");
    }
}
