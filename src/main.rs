//! # Mugshot Scraper
//!
//! Watches a county jail's booking listing, archives each new booking's
//! mugshot and details, and posts an LLM-written caption for it to a
//! Facebook page.
//!
//! ## Units
//!
//! Three independent tasks share one shutdown token (the scraper holds a
//! child of it, so stopping the scraper alone leaves the others running):
//! 1. **Scraper**: month passes over the booking listing every five minutes
//!    ([`orchestrator`], [`scrapers`])
//! 2. **Poster**: captions and publishes today's pending records ([`poster`])
//! 3. **Dashboard**: streams the log over server-sent events ([`dashboard`])
//!
//! They never share in-process state; records move from `pending` to
//! `posted` in the record store.
//!
//! ## Usage
//!
//! ```sh
//! # configuration comes from flags, the environment, or ./.env
//! mugshot_scraper
//! ```

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

mod api;
mod blob;
mod cli;
mod dashboard;
mod error;
mod imaging;
mod logging;
mod models;
mod orchestrator;
mod poster;
mod prompt;
mod publish;
mod scrapers;
mod session;
mod store;
mod utils;

use blob::SupabaseStorage;
use cli::Cli;
use dashboard::LogFeed;
use imaging::BottomCrop;
use orchestrator::{Orchestrator, Timing};
use poster::{Poster, PosterSettings};
use publish::FacebookPublisher;
use scrapers::article::Extractor;
use scrapers::dedupe::DuplicateFilter;
use scrapers::listing::Paginator;
use scrapers::markup::{EntryMarkup, Markup};
use session::{ReqwestConnector, SessionManager, SessionPolicy};
use store::{PgRecordStore, RecordStore};

/// How long units get to exit after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for each unit until the grace deadline, then abort the stragglers.
async fn join_units(units: Vec<(&'static str, JoinHandle<()>)>) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    for (name, mut handle) in units {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => info!(unit = name, "Unit stopped"),
            Ok(Err(e)) if e.is_panic() => error!(unit = name, error = %e, "Unit panicked"),
            Ok(Err(e)) => warn!(unit = name, error = %e, "Unit was cancelled"),
            Err(_) => {
                warn!(unit = name, grace = ?SHUTDOWN_GRACE, "Unit did not stop in time; aborting");
                handle.abort();
            }
        }
    }
}

#[instrument(skip_all)]
async fn run(args: Cli, feed: LogFeed) -> Result<(), Box<dyn Error>> {
    let target = args.target()?;
    info!(%target, "Scrape target configured");

    // ---- Collaborators ----
    let store = Arc::new(PgRecordStore::connect(&args.database_url).await?);
    store.ensure_schema().await?;
    info!("Initialized components successfully");
    let store: Arc<dyn RecordStore> = store;

    let blobs = Arc::new(SupabaseStorage::new(
        &args.supabase_url,
        args.supabase_key.clone(),
        args.supabase_bucket_name.clone(),
    )?);
    let cancel = CancellationToken::new();

    let generator = Arc::new(api::openai_generator(
        &args.openai_key,
        &args.openai_model,
        cancel.clone(),
    )?);
    let publisher = Arc::new(FacebookPublisher::new(
        args.facebook_page_id.clone(),
        args.facebook_access_token.clone(),
    )?);

    // ---- Scraper ----
    // Stopping the scraper leaves the poster and dashboard running.
    let scraper_cancel = cancel.child_token();
    let markup: Arc<dyn Markup> = Arc::new(EntryMarkup);
    let extractor = Extractor::new(
        target.clone(),
        markup.clone(),
        Arc::new(BottomCrop),
        blobs,
        store.clone(),
    );
    let paginator = Paginator::new(
        target,
        markup,
        DuplicateFilter::new(store.clone()),
        extractor,
        scraper_cancel.clone(),
    );
    let session = SessionManager::new(
        ReqwestConnector::default(),
        SessionPolicy::default().with_max_attempts(args.max_retries),
        scraper_cancel.clone(),
    )?;
    let scraper =
        Orchestrator::new(paginator, Box::new(session), Timing::default(), scraper_cancel);

    // ---- Poster ----
    let poster = Poster::new(
        store,
        generator,
        publisher,
        PosterSettings {
            max_tokens: args.caption_max_tokens,
            ..PosterSettings::default()
        },
        cancel.clone(),
    );

    // ---- Units ----
    let dashboard_cancel = cancel.clone();
    let addr = args.dashboard_addr;
    let units = vec![
        ("scraper", tokio::spawn(scraper.run())),
        ("poster", tokio::spawn(poster.run())),
        (
            "dashboard",
            tokio::spawn(async move {
                if let Err(e) = dashboard::serve(addr, feed, dashboard_cancel).await {
                    error!(error = %e, "Dashboard stopped");
                }
            }),
        ),
    ];

    shutdown_signal().await;
    info!("Received shutdown signal. Stopping all units...");
    cancel.cancel();
    join_units(units).await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let env_file = dotenvy::dotenv_override();

    let args = Cli::parse();

    let feed = LogFeed::new();
    let _log_guard = logging::init_tracing(feed.clone(), &args.log_dir)?;

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "mugshot_scraper starting up");
    match env_file {
        Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => warn!(error = %e, "Failed to load .env file"),
    }

    debug!(
        log_dir = %args.log_dir.display(),
        base_url = %args.base_url,
        county = %args.county,
        "Parsed CLI arguments"
    );

    if let Err(e) = run(args, feed).await {
        error!(error = %e, "Startup failed");
        return Err(e);
    }

    let elapsed = start_time.elapsed();
    info!(?elapsed, secs = elapsed.as_secs(), "All units terminated");
    Ok(())
}
