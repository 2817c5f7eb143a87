//! Live log dashboard.
//!
//! A second `tracing_subscriber::fmt` layer writes every formatted log line
//! into a [`LogFeed`], a bounded broadcast channel. The dashboard serves a
//! static page at `/` that follows `/stream`, a server-sent-events stream of
//! those lines. Subscribers that fall behind lose the oldest lines and get a
//! notice with the number missed.

use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::fmt::MakeWriter;

use crate::error::{Result, ScrapeError};

pub const CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_ADDR: &str = "0.0.0.0:5000";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Scraper logs</title>
<style>
body { background: #111; color: #ddd; font-family: monospace; margin: 1em; }
#log div { white-space: pre-wrap; }
</style>
</head>
<body>
<div id="log"></div>
<script>
const log = document.getElementById("log");
const source = new EventSource("/stream");
source.onmessage = (e) => {
  const line = document.createElement("div");
  line.textContent = e.data;
  log.appendChild(line);
  window.scrollTo(0, document.body.scrollHeight);
};
</script>
</body>
</html>
"#;

/// Broadcast channel of formatted log lines.
#[derive(Clone)]
pub struct LogFeed {
    tx: broadcast::Sender<String>,
}

impl LogFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Push one line. Lines sent while nobody is listening are dropped.
    pub fn send(&self, line: impl Into<String>) {
        let _ = self.tx.send(line.into());
    }
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffers one formatted event and forwards it to the feed when dropped.
pub struct FeedWriter {
    feed: LogFeed,
    buf: Vec<u8>,
}

impl io::Write for FeedWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FeedWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.feed.send(line);
        }
    }
}

impl<'a> MakeWriter<'a> for LogFeed {
    type Writer = FeedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FeedWriter {
            feed: self.clone(),
            buf: Vec::with_capacity(256),
        }
    }
}

#[derive(Clone)]
struct DashboardState {
    feed: LogFeed,
    cancel: CancellationToken,
}

pub fn router(feed: LogFeed, cancel: CancellationToken) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/stream", get(stream))
        .with_state(DashboardState { feed, cancel })
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

type EventResult = std::result::Result<Event, Infallible>;

async fn stream(State(state): State<DashboardState>) -> Sse<impl Stream<Item = EventResult>> {
    let events = log_lines(state.feed.subscribe(), state.cancel)
        .map(|line| Ok(Event::default().data(line)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Text shown for one broadcast item.
fn render(item: std::result::Result<String, BroadcastStreamRecvError>) -> String {
    match item {
        Ok(line) => line,
        Err(BroadcastStreamRecvError::Lagged(n)) => format!("[{n} log lines missed]"),
    }
}

/// Lines from `rx` until `cancel` fires.
fn log_lines(
    rx: broadcast::Receiver<String>,
    cancel: CancellationToken,
) -> impl Stream<Item = String> {
    BroadcastStream::new(rx)
        .map(render)
        .take_until(async move { cancel.cancelled().await })
}

/// Serve the dashboard on `addr` until `cancel` fires.
pub async fn serve(addr: SocketAddr, feed: LogFeed, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ScrapeError::Config(format!("cannot bind dashboard to {addr}: {e}")))?;
    info!(%addr, "Dashboard listening");

    let shutdown = cancel.clone();
    axum::serve(listener, router(feed, cancel))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ScrapeError::Config(format!("dashboard server failed: {e}")))?;

    info!("Dashboard shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_writer_forwards_each_line() {
        let feed = LogFeed::new();
        let mut rx = feed.subscribe();
        let line = "2024-08-24T00:00:00Z  INFO scraper: Starting scraping pass";
        {
            let mut w = feed.make_writer();
            w.write_all(format!("{line}\n").as_bytes()).unwrap();
        }
        assert_eq!(rx.try_recv().unwrap(), line);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_without_subscribers_is_dropped() {
        let feed = LogFeed::new();
        feed.send("nobody listening");
        let mut rx = feed.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_lag_is_reported() {
        assert_eq!(render(Err(BroadcastStreamRecvError::Lagged(7))), "[7 log lines missed]");
    }

    #[tokio::test]
    async fn test_slow_subscriber_sees_missed_count() {
        let feed = LogFeed::new();
        let cancel = CancellationToken::new();
        let lines = log_lines(feed.subscribe(), cancel.clone());
        for i in 0..CHANNEL_CAPACITY + 3 {
            feed.send(format!("line {i}"));
        }
        let mut lines = Box::pin(lines);
        assert_eq!(lines.next().await, Some("[3 log lines missed]".to_string()));
        assert_eq!(lines.next().await, Some("line 3".to_string()));
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let feed = LogFeed::new();
        let cancel = CancellationToken::new();
        let mut lines = Box::pin(log_lines(feed.subscribe(), cancel.clone()));

        feed.send("before shutdown");
        assert_eq!(lines.next().await.as_deref(), Some("before shutdown"));
        cancel.cancel();
        assert_eq!(lines.next().await, None);
    }

    #[tokio::test]
    async fn test_index_opens_event_source() {
        let Html(page) = index().await;
        assert!(page.contains(r#"new EventSource("/stream")"#));
    }
}
