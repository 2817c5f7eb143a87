//! Object storage for mugshot images.
//!
//! [`BlobStore::upload`] is idempotent: uploading a filename that already
//! exists hands back the existing object's public URL.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use crate::error::{Result, ScrapeError};
use crate::utils::truncate_for_log;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Public URL of `filename` if it is already stored.
    async fn exists(&self, filename: &str) -> Result<Option<String>>;

    /// Store `bytes` under `filename` and return its public URL.
    async fn upload(&self, bytes: Bytes, filename: &str, content_type: &str) -> Result<String>;
}

/// Supabase Storage bucket accessed over its REST API.
#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    client: reqwest::Client,
    base_url: String,
    key: String,
    bucket: String,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

impl SupabaseStorage {
    /// Client for one bucket of a Supabase project.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Project URL, e.g. `https://proj.supabase.co`
    /// * `key` - Service key sent as the bearer token
    /// * `bucket` - Bucket that holds the mugshots
    ///
    /// # Errors
    ///
    /// [`ScrapeError::Network`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, key: impl Into<String>, bucket: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.into(),
            bucket: bucket.into(),
        })
    }

    pub fn public_url(&self, filename: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            urlencoding::encode(filename)
        )
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.key).header("apikey", &self.key)
    }
}

/// Supabase reports duplicates as 409, or as 400 with a "Duplicate" body.
fn is_duplicate(status: u16, body: &str) -> bool {
    status == 409 || body.contains("already exists") || body.contains("\"Duplicate\"")
}

#[async_trait]
impl BlobStore for SupabaseStorage {
    #[instrument(level = "debug", skip(self))]
    async fn exists(&self, filename: &str) -> Result<Option<String>> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let resp = self
            .authed(self.client.post(&url))
            .json(&json!({ "prefix": "", "search": filename, "limit": 100 }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let objects: Vec<ListedObject> = resp.json().await?;
        Ok(objects
            .iter()
            .any(|o| o.name == filename)
            .then(|| self.public_url(filename)))
    }

    #[instrument(level = "info", skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(&self, bytes: Bytes, filename: &str, content_type: &str) -> Result<String> {
        info!("Checking if image already exists in storage");
        match self.exists(filename).await {
            Ok(Some(url)) => {
                info!(%url, "Image already exists in storage");
                return Ok(url);
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Existence check failed; uploading anyway"),
        }

        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            urlencoding::encode(filename)
        );
        let resp = self
            .authed(self.client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ScrapeError::Upload(format!("{filename}: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            let public = self.public_url(filename);
            info!(url = %public, "Uploaded image to storage");
            Ok(public)
        } else if is_duplicate(status.as_u16(), &body) {
            let public = self.public_url(filename);
            info!(url = %public, "Image already exists in storage");
            Ok(public)
        } else {
            error!(
                status = status.as_u16(),
                body = %truncate_for_log(&body, 300),
                "Upload rejected"
            );
            Err(ScrapeError::Upload(format!(
                "{filename}: HTTP {} {}",
                status.as_u16(),
                truncate_for_log(&body, 120)
            )))
        }
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory [`BlobStore`] for tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    pub struct MemoryBlobs {
        pub objects: Mutex<HashMap<String, Bytes>>,
        pub uploads: AtomicU32,
        pub reject: AtomicBool,
    }

    impl MemoryBlobs {
        pub fn uploads(&self) -> u32 {
            self.uploads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        async fn exists(&self, filename: &str) -> Result<Option<String>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .contains_key(filename)
                .then(|| format!("https://blobs.example/{filename}")))
        }

        async fn upload(
            &self,
            bytes: Bytes,
            filename: &str,
            _content_type: &str,
        ) -> Result<String> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                return Err(ScrapeError::Upload(format!("{filename}: rejected")));
            }
            self.objects.lock().unwrap().insert(filename.to_string(), bytes);
            Ok(format!("https://blobs.example/{filename}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url() {
        let storage = SupabaseStorage::new("https://abc.supabase.co/", "key", "mugshots").unwrap();
        assert_eq!(
            storage.public_url("John_OBrien_08-24-2024.jpg"),
            "https://abc.supabase.co/storage/v1/object/public/mugshots/John_OBrien_08-24-2024.jpg"
        );
    }

    #[test]
    fn test_duplicate_detection() {
        assert!(is_duplicate(409, ""));
        assert!(is_duplicate(
            400,
            r#"{"statusCode":"409","error":"Duplicate","message":"The resource already exists"}"#
        ));
        assert!(!is_duplicate(400, r#"{"error":"Invalid JWT"}"#));
    }
}
