//! HTTP session management with identity rotation and retry backoff.
//!
//! A session is one HTTP client with its own cookie jar and a spoofed browser
//! identity. [`SessionManager`] counts requests against the live session and
//! swaps it out when quotas run out or an endpoint keeps failing:
//!
//! - Rotate before a request once the session served `max_requests` or is
//!   older than `max_age`.
//! - After a successful response, sleep a random `pacing` delay scaled by
//!   `2^attempt` so the *next* request is spaced out.
//! - On failure, sleep a random `retry_delay` and try again.
//! - When all attempts fail, rotate, sleep a random `cooldown`, and return the
//!   last error.
//!
//! The transport sits behind [`Connector`]/[`Connection`] so the policy can be
//! exercised without a network.

use async_trait::async_trait;
use bytes::Bytes;
use rand::rng;
use rand::seq::IndexedRandom;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, ScrapeError};
use crate::utils::{pause, random_delay};

/// Desktop browser identities handed out to new sessions.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 OPR/108.0.0.0",
];

/// Pick a random browser identity for a fresh session.
pub fn random_identity() -> &'static str {
    USER_AGENTS.choose(&mut rng()).copied().unwrap_or(USER_AGENTS[0])
}

/// Quotas and delays governing one [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Attempts per request before giving up (at least 1).
    pub max_attempts: u32,
    /// Requests a session may serve before it is replaced.
    pub max_requests: u32,
    /// Age after which a session is replaced.
    pub max_age: Duration,
    /// Delay after a success, scaled by `2^attempt`.
    pub pacing: RangeInclusive<Duration>,
    /// Delay between failed attempts.
    pub retry_delay: RangeInclusive<Duration>,
    /// Delay after rotating on exhausted attempts.
    pub cooldown: RangeInclusive<Duration>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_requests: 100,
            max_age: Duration::from_secs(3600),
            pacing: Duration::from_secs(2)..=Duration::from_secs(5),
            retry_delay: Duration::from_secs(10)..=Duration::from_secs(20),
            cooldown: Duration::from_secs(60)..=Duration::from_secs(120),
        }
    }
}

impl SessionPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Opens transport connections for a given client identity.
pub trait Connector: Send + Sync {
    type Conn: Connection;

    fn connect(&self, identity: &str) -> Result<Self::Conn>;
}

/// A live transport able to GET a URL and return the body of a 2xx response.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes>;
}

/// Anything that can fetch a URL on behalf of the scraper.
#[async_trait]
pub trait Fetch: Send {
    async fn fetch(&mut self, url: &str) -> Result<Bytes>;
}

/// Builds `reqwest` clients with browser-like default headers.
#[derive(Debug, Clone)]
pub struct ReqwestConnector {
    timeout: Duration,
}

impl Default for ReqwestConnector {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl Connector for ReqwestConnector {
    type Conn = reqwest::Client;

    fn connect(&self, identity: &str) -> Result<Self::Conn> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = reqwest::Client::builder()
            .user_agent(identity)
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .timeout(self.timeout)
            .build()?;
        Ok(client)
    }
}

#[async_trait]
impl Connection for reqwest::Client {
    async fn get(&self, url: &str) -> Result<Bytes> {
        let resp = reqwest::Client::get(self, url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.bytes().await?)
    }
}

struct Session<T> {
    conn: T,
    identity: String,
    requests: u32,
    started: Instant,
}

/// Owns the current session and applies [`SessionPolicy`] to every request.
///
/// One manager per scraper; it is not shared across tasks.
pub struct SessionManager<C: Connector> {
    connector: C,
    policy: SessionPolicy,
    session: Session<C::Conn>,
    rotations: u32,
    cancel: CancellationToken,
}

impl<C: Connector> SessionManager<C> {
    /// Open the first session.
    ///
    /// # Arguments
    ///
    /// * `connector` - Builds a transport for each new identity
    /// * `policy` - Retry counts, quotas and delays
    /// * `cancel` - Cuts retry and cooldown waits short on shutdown
    ///
    /// # Returns
    ///
    /// A manager holding one open session, or the connector's error.
    pub fn new(connector: C, policy: SessionPolicy, cancel: CancellationToken) -> Result<Self> {
        let session = Self::open(&connector)?;
        info!(identity = %session.identity, "Opened HTTP session");
        Ok(Self {
            connector,
            policy,
            session,
            rotations: 0,
            cancel,
        })
    }

    fn open(connector: &C) -> Result<Session<C::Conn>> {
        let identity = random_identity().to_string();
        let conn = connector.connect(&identity)?;
        Ok(Session {
            conn,
            identity,
            requests: 0,
            started: Instant::now(),
        })
    }

    /// Number of times the session has been replaced since construction.
    pub fn rotations(&self) -> u32 {
        self.rotations
    }

    /// Requests served by the current session.
    pub fn session_requests(&self) -> u32 {
        self.session.requests
    }

    fn needs_rotation(&self) -> bool {
        self.session.requests >= self.policy.max_requests
            || self.session.started.elapsed() > self.policy.max_age
    }

    fn rotate(&mut self, reason: &str) -> Result<()> {
        let previous = self.session.requests;
        self.session = Self::open(&self.connector)?;
        self.rotations += 1;
        info!(
            reason,
            served = previous,
            rotations = self.rotations,
            identity = %self.session.identity,
            "Rotated to a new session"
        );
        Ok(())
    }

    /// GET `url`, retrying per the policy.
    #[instrument(level = "debug", skip(self))]
    pub async fn request(&mut self, url: &str) -> Result<Bytes> {
        let max_attempts = self.policy.max_attempts.max(1);

        // Failures so far; also the pacing exponent on success.
        let mut attempt: u32 = 0;

        loop {
            if self.needs_rotation() {
                self.rotate("session quota reached")?;
            }

            let err = match self.session.conn.get(url).await {
                Ok(body) => {
                    self.session.requests += 1;
                    let wait = random_delay(&self.policy.pacing).saturating_mul(1 << attempt);
                    debug!(
                        %url,
                        bytes = body.len(),
                        requests = self.session.requests,
                        ?wait,
                        "Request succeeded; pacing next request"
                    );
                    if pause(&self.cancel, wait).await.is_err() {
                        debug!("Pacing delay cut short by shutdown");
                    }
                    return Ok(body);
                }
                Err(e) => e,
            };

            attempt += 1;
            warn!(%url, attempt, max = max_attempts, error = %err, "Request failed");
            if attempt >= max_attempts {
                error!(
                    %url,
                    attempts = max_attempts,
                    "Endpoint exhausted retries; rotating session"
                );
                self.rotate("retries exhausted")?;
                let cooldown = random_delay(&self.policy.cooldown);
                info!(?cooldown, "Cooling down after rotation");
                pause(&self.cancel, cooldown).await?;
                return Err(err);
            }
            pause(&self.cancel, random_delay(&self.policy.retry_delay)).await?;
        }
    }
}

#[async_trait]
impl<C: Connector> Fetch for SessionManager<C> {
    async fn fetch(&mut self, url: &str) -> Result<Bytes> {
        self.request(url).await
    }
}
