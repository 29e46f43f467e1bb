//! Materialises job images as local files.
//!
//! Path sources are passed through untouched. URL sources are
//! downloaded and inline base64 payloads are decoded, both into the
//! task's working directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use vidgen_core::request::ImageSource;

/// File name used for the primary image inside the work dir.
pub const START_IMAGE_NAME: &str = "input_image.jpg";

/// File name used for the terminal-frame image inside the work dir.
pub const END_IMAGE_NAME: &str = "end_image.jpg";

/// Failure to obtain an input image.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to download image from {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to download image from {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to decode base64 image: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to write image to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Turns an [`ImageSource`] into a path the engine can read.
#[derive(Debug, Clone)]
pub struct InputResolver {
    client: reqwest::Client,
    download_timeout: Duration,
}

impl InputResolver {
    pub fn new(download_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            download_timeout,
        }
    }

    /// Resolve `source`, writing into `work_dir/output_name` when the
    /// bytes have to be fetched or decoded.
    pub async fn resolve(
        &self,
        source: &ImageSource,
        work_dir: &Path,
        output_name: &str,
    ) -> Result<PathBuf, InputError> {
        match source {
            ImageSource::Path(path) => {
                tracing::debug!(path = %path, "Using local image path");
                Ok(PathBuf::from(path))
            }
            ImageSource::Url(url) => {
                let bytes = self.download(url).await?;
                let target = write_file(work_dir, output_name, &bytes).await?;
                tracing::info!(url = %url, path = %target.display(), bytes = bytes.len(), "Downloaded input image");
                Ok(target)
            }
            ImageSource::Base64(data) => {
                let bytes = decode_base64(data)?;
                let target = write_file(work_dir, output_name, &bytes).await?;
                tracing::info!(path = %target.display(), bytes = bytes.len(), "Decoded inline input image");
                Ok(target)
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, InputError> {
        let map_err = |source| InputError::Download {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(InputError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(map_err)?;
        Ok(bytes.to_vec())
    }
}

/// Decode standard base64, tolerating a `data:<mime>;base64,` prefix
/// and embedded whitespace.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD.decode(cleaned)
}

async fn write_file(work_dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, InputError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| InputError::Write { path, source }
    };

    tokio::fs::create_dir_all(work_dir)
        .await
        .map_err(write_err(work_dir))?;
    let dir = tokio::fs::canonicalize(work_dir)
        .await
        .map_err(write_err(work_dir))?;

    let target = dir.join(name);
    tokio::fs::write(&target, bytes)
        .await
        .map_err(write_err(&target))?;
    Ok(target)
}
