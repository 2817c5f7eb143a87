//! LLM API interaction with exponential backoff retry logic.
//!
//! Captions come from an OpenAI chat-completions endpoint. Transient failures
//! (network errors, 429, 5xx) are retried with exponential backoff and
//! jitter; anything else gives up at once.
//!
//! # Architecture
//!
//! - [`AskAsync`]: one raw completion request that may fail
//! - [`OpenAiChat`]: [`AskAsync`] over the chat-completions REST API
//! - [`RetryAsk`]: decorator adding backoff to any [`AskAsync`]
//! - [`TextGenerator`]: the contract the poster consumes; never fails, an
//!   empty string stands for "no caption"
//!
//! # Retry Strategy
//!
//! - Up to 5 attempts in total
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to every delay
//! - A backoff wait ends early with [`ScrapeError::Cancelled`] on shutdown

use async_trait::async_trait;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::{Duration as StdDuration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::{Result, ScrapeError};
use crate::utils::{pause, truncate_for_log};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_TOKENS: u32 = 200;
const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// A single completion request against an LLM backend.
pub trait AskAsync {
    fn ask(&self, text: &str, max_tokens: u32) -> impl Future<Output = Result<String>> + Send;
}

/// Produces caption text for a prompt.
///
/// Implementations swallow their own failures: an empty string means no text
/// could be generated, and the reason has already been logged.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> String;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// The delay before retry `n` (1-based) is
/// ```text
/// delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    inner: T,
    /// Retries after the first attempt.
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
    cancel: CancellationToken,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Wrap `inner` with retries.
    ///
    /// # Arguments
    ///
    /// * `inner` - The backend to retry
    /// * `max_retries` - Retries allowed after the first attempt
    /// * `base_delay` - Wait before the first retry; doubles on each further one
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon backoff waits once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + Sync,
{
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str, max_tokens: u32) -> Result<String> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text, max_tokens).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_transient() || attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            transient = e.is_transient(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "ask() giving up"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    pause(&self.cancel, delay).await?;
                }
            }
        }
    }
}

#[async_trait]
impl<T> TextGenerator for RetryAsk<T>
where
    T: AskAsync + Send + Sync,
{
    async fn complete(&self, prompt: &str, max_tokens: u32) -> String {
        let t0 = Instant::now();
        match self.ask(prompt, max_tokens).await {
            Ok(text) => {
                info!(
                    elapsed_ms_total = t0.elapsed().as_millis(),
                    chars = text.len(),
                    "Generated caption"
                );
                text
            }
            Err(e) => {
                error!(
                    elapsed_ms_total = t0.elapsed().as_millis(),
                    error = %e,
                    "Caption generation failed"
                );
                String::new()
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Trimmed content of the first choice in a chat-completions response body.
fn first_choice(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        ScrapeError::parse(format!(
            "chat completion is not valid JSON ({e}): {}",
            truncate_for_log(body, 300)
        ))
    })?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ScrapeError::parse("chat completion has no choices"))
}

/// OpenAI chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiChat {
    /// Client for `model` authenticated with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Network`] if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: CHAT_COMPLETIONS_URL.to_string(),
        })
    }
}

impl AskAsync for OpenAiChat {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, text: &str, max_tokens: u32) -> Result<String> {
        let t0 = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: text }],
            max_tokens,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            warn!(
                elapsed_ms = t0.elapsed().as_millis(),
                %status,
                body = %truncate_for_log(&body, 300),
                "API call failed"
            );
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }
        first_choice(&body)
    }
}

/// Caption generator used in production.
pub type OpenAiGenerator = RetryAsk<OpenAiChat>;

/// OpenAI generator with the standard retry policy.
///
/// # Arguments
///
/// * `api_key` - OpenAI API key
/// * `model` - Chat model name
/// * `cancel` - Shutdown token; a pending backoff ends when it fires
pub fn openai_generator(
    api_key: &str,
    model: &str,
    cancel: CancellationToken,
) -> Result<OpenAiGenerator> {
    let chat = OpenAiChat::new(api_key, model)?;
    Ok(RetryAsk::new(chat, 4, StdDuration::from_secs(1)).with_cancel(cancel))
}
