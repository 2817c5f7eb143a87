//! Publishing captioned mugshots to a Facebook page.
//!
//! [`Publisher::publish`] reports success as a boolean. Failures are logged
//! here with the response status and body, so callers only decide whether to
//! mark the record as posted.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::utils::truncate_for_log;

const GRAPH_API: &str = "https://graph.facebook.com";

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, caption: &str, image_url: &str) -> bool;
}

/// Graph API photo post on a page.
#[derive(Clone)]
pub struct FacebookPublisher {
    client: reqwest::Client,
    page_id: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct PhotoPosted {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    post_id: Option<String>,
}

impl FacebookPublisher {
    /// Graph API client posting photos to `page_id`.
    pub fn new(page_id: impl Into<String>, access_token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            page_id: page_id.into(),
            access_token: access_token.into(),
        })
    }

    fn photos_url(&self) -> String {
        format!("{GRAPH_API}/{}/photos", self.page_id)
    }
}

impl std::fmt::Debug for FacebookPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacebookPublisher")
            .field("page_id", &self.page_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Publisher for FacebookPublisher {
    #[instrument(level = "info", skip(self, caption), fields(page_id = %self.page_id))]
    async fn publish(&self, caption: &str, image_url: &str) -> bool {
        let params = [
            ("message", caption),
            ("access_token", self.access_token.as_str()),
            ("url", image_url),
        ];
        let resp = match self.client.post(self.photos_url()).query(&params).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "Error posting to Facebook");
                return false;
            }
        };

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(
                status = status.as_u16(),
                body = %truncate_for_log(&body, 500),
                "Error posting to Facebook"
            );
            return false;
        }

        match serde_json::from_str::<PhotoPosted>(&body) {
            Ok(posted) => info!(id = ?posted.id, post_id = ?posted.post_id, "Post successful"),
            Err(_) => info!(body = %truncate_for_log(&body, 200), "Post successful"),
        }
        true
    }
}

#[cfg(test)]
pub mod fake {
    //! Recording [`Publisher`] for tests.

    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    pub struct FakePublisher {
        pub posts: Mutex<Vec<(String, String)>>,
        pub fail: AtomicBool,
    }

    impl FakePublisher {
        pub fn posted(&self) -> Vec<(String, String)> {
            self.posts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, caption: &str, image_url: &str) -> bool {
            if self.fail.load(Ordering::SeqCst) {
                return false;
            }
            self.posts
                .lock()
                .unwrap()
                .push((caption.to_string(), image_url.to_string()));
            true
        }
    }
}
