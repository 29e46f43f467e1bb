//! Upload of finished videos to object storage.
//!
//! [`StorageClient`] PUTs the file to `{endpoint}/{zone}/{folder}/{name}`
//! with the zone access key and returns the public CDN URL. One attempt
//! per job; a failed upload fails the job.

use std::path::{Path, PathBuf};

use vidgen_core::naming::public_url;

use crate::config::StorageConfig;

/// Header carrying the storage zone password.
const ACCESS_KEY_HEADER: &str = "AccessKey";

const VIDEO_CONTENT_TYPE: &str = "video/mp4";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to read video {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Anything other than 200/201.
    #[error("Upload rejected with HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

// ---------------------------------------------------------------------------
// StorageClient
// ---------------------------------------------------------------------------

/// Where a delivered video ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub public_url: String,
    pub folder: String,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct StorageClient {
    client: reqwest::Client,
    config: StorageConfig,
}

impl StorageClient {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Upload `path` under the configured folder as `filename`.
    pub async fn deliver(&self, path: &Path, filename: &str) -> Result<DeliveryResult, DeliveryError> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|source| DeliveryError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let size = body.len();

        let folder = &self.config.folder;
        let url = format!(
            "{}/{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.zone,
            folder,
            filename,
        );

        tracing::info!(url = %url, size, "Uploading video");

        let response = self
            .client
            .put(&url)
            .header(ACCESS_KEY_HEADER, &self.config.access_key)
            .header(reqwest::header::CONTENT_TYPE, VIDEO_CONTENT_TYPE)
            .timeout(self.config.upload_timeout)
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 && status != 201 {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::error!(status, body = %body, "Upload rejected by storage");
            return Err(DeliveryError::HttpStatus { status, body });
        }

        let public_url = public_url(&self.config.cdn_host, folder, filename);
        tracing::info!(public_url = %public_url, "Upload complete");

        Ok(DeliveryResult {
            public_url,
            folder: folder.clone(),
            filename: filename.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn storage(endpoint: String) -> StorageClient {
        StorageClient::new(StorageConfig {
            endpoint,
            zone: "mesulo".into(),
            access_key: "zone-key".into(),
            cdn_host: "mesulo.b-cdn.net".into(),
            folder: "runpod".into(),
            upload_timeout: Duration::from_secs(5),
        })
    }

    fn video_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"fake mp4 bytes").unwrap();
        file
    }

    #[tokio::test]
    async fn uploads_with_access_key_and_returns_cdn_url() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/mesulo/runpod/task_1_deadbeef.mp4")
            .match_header("AccessKey", "zone-key")
            .match_header("content-type", "video/mp4")
            .match_body(Matcher::Exact("fake mp4 bytes".into()))
            .with_status(201)
            .create_async()
            .await;

        let file = video_file();
        let result = storage(server.url())
            .deliver(file.path(), "task_1_deadbeef.mp4")
            .await
            .unwrap();

        assert_eq!(
            result.public_url,
            "https://mesulo.b-cdn.net/runpod/task_1_deadbeef.mp4"
        );
        assert_eq!(result.folder, "runpod");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn plain_ok_is_accepted() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("PUT", Matcher::Any)
            .with_status(200)
            .create_async()
            .await;

        let file = video_file();
        assert!(storage(server.url()).deliver(file.path(), "a.mp4").await.is_ok());
    }

    #[tokio::test]
    async fn other_success_codes_are_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("PUT", Matcher::Any)
            .with_status(204)
            .create_async()
            .await;

        let file = video_file();
        let err = storage(server.url())
            .deliver(file.path(), "a.mp4")
            .await
            .unwrap_err();
        assert_matches!(err, DeliveryError::HttpStatus { status: 204, .. });
    }

    #[tokio::test]
    async fn forbidden_carries_status_and_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("PUT", Matcher::Any)
            .with_status(403)
            .with_body(r#"{"HttpCode":403,"Message":"Unauthorized"}"#)
            .create_async()
            .await;

        let file = video_file();
        let err = storage(server.url())
            .deliver(file.path(), "a.mp4")
            .await
            .unwrap_err();
        assert_matches!(err, DeliveryError::HttpStatus { status: 403, ref body } if body.contains("Unauthorized"));
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let client = storage("http://127.0.0.1:9".into());
        let err = client
            .deliver(Path::new("/definitely/missing.mp4"), "a.mp4")
            .await
            .unwrap_err();
        assert_matches!(err, DeliveryError::Read { .. });
    }
}
