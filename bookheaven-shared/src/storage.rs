/// Blob storage for uploaded images (UploadThing).
///
/// Uploads happen browser-to-storage; the API only records the resulting
/// file key and URL. What the API does own is deletion: when an image row
/// is replaced or its owner is deleted, the old file must go too.
///
/// Deletion always runs after the database commit. A failure there must not
/// undo a committed change, so [`cleanup_after_commit`] records the keys in
/// `orphaned_blobs` for the worker to retry and otherwise swallows the error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::models::orphaned_blob::OrphanedBlob;

pub const DEFAULT_UPLOADTHING_API_URL: &str = "https://api.uploadthing.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Storage rejected deletion of {failed} file(s)")]
    Partial { failed: usize },
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn delete_files(&self, keys: &[String]) -> Result<(), StorageError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteFilesRequest<'a> {
    file_keys: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteFilesResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    deleted_count: Option<usize>,
}

fn default_success() -> bool {
    true
}

pub struct UploadThingClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl UploadThingClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl BlobStore for UploadThingClient {
    async fn delete_files(&self, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }

        let resp = self
            .http
            .post(format!("{}/v6/deleteFiles", self.base_url))
            .header("x-uploadthing-api-key", &self.api_key)
            .json(&DeleteFilesRequest { file_keys: keys })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Upstream { status, body });
        }

        let result: DeleteFilesResponse = resp.json().await?;
        let deleted = result.deleted_count.unwrap_or(keys.len());

        if !result.success || deleted < keys.len() {
            return Err(StorageError::Partial {
                failed: keys.len().saturating_sub(deleted).max(1),
            });
        }

        tracing::debug!(count = keys.len(), "Deleted blobs");
        Ok(())
    }
}

/// Store used when no storage credentials are configured
///
/// Deletions are logged and dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBlobStore;

#[async_trait]
impl BlobStore for NoopBlobStore {
    async fn delete_files(&self, keys: &[String]) -> Result<(), StorageError> {
        if !keys.is_empty() {
            tracing::debug!(count = keys.len(), "Blob storage not configured; skipping deletion");
        }
        Ok(())
    }
}

/// Deletes blobs released by a committed transaction
///
/// Never fails: a storage error queues the keys for the worker, and an error
/// writing that queue is logged.
pub async fn cleanup_after_commit(store: &dyn BlobStore, pool: &PgPool, keys: &[String]) {
    if keys.is_empty() {
        return;
    }

    let Err(err) = store.delete_files(keys).await else {
        return;
    };

    tracing::warn!(error = %err, count = keys.len(), "Blob deletion failed; queueing for retry");

    if let Err(db_err) = OrphanedBlob::record(pool, keys, &err.to_string()).await {
        tracing::error!(error = %db_err, keys = ?keys, "Failed to record orphaned blobs");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn keys() -> Vec<String> {
        vec!["abc123.jpg".to_string(), "def456.png".to_string()]
    }

    #[tokio::test]
    async fn test_delete_files_sends_keys() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v6/deleteFiles"))
            .and(header("x-uploadthing-api-key", "sk_live_test"))
            .and(body_json(serde_json::json!({ "fileKeys": ["abc123.jpg", "def456.png"] })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "success": true, "deletedCount": 2 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = UploadThingClient::new(server.uri(), "sk_live_test");
        client.delete_files(&keys()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_files_skips_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = UploadThingClient::new(server.uri(), "sk_live_test");
        client.delete_files(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_files_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let client = UploadThingClient::new(server.uri(), "bad");
        let result = client.delete_files(&keys()).await;
        assert!(matches!(result, Err(StorageError::Upstream { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_delete_files_partial() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "success": true, "deletedCount": 1 })),
            )
            .mount(&server)
            .await;

        let client = UploadThingClient::new(server.uri(), "sk_live_test");
        let result = client.delete_files(&keys()).await;
        assert!(matches!(result, Err(StorageError::Partial { failed: 1 })));
    }

    #[tokio::test]
    async fn test_noop_store() {
        assert!(NoopBlobStore.delete_files(&keys()).await.is_ok());
    }
}
