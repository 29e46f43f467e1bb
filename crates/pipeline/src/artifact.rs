//! Locating the generated video after execution ends.
//!
//! Two stages, each with its own time budget: ask the engine's history
//! for the output reference, and if that yields nothing usable, scan
//! the output directory for a freshly written file.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::time::Instant;
use vidgen_comfyui::api::ComfyUIApi;
use vidgen_comfyui::history::video_outputs;
use vidgen_core::types::Timestamp;

use crate::config::ArtifactLookupConfig;
use crate::discovery::find_recent_video;

/// Where an artifact was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    History,
    FilesystemScan,
}

impl ArtifactSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::FilesystemScan => "filesystem_scan",
        }
    }
}

/// A generated video ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub source: ArtifactSource,
    pub size: u64,
    pub modified: Option<Timestamp>,
}

/// Finds the output of one prompt.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    api: ComfyUIApi,
    output_dir: PathBuf,
    config: ArtifactLookupConfig,
}

impl ArtifactLocator {
    pub fn new(api: ComfyUIApi, output_dir: PathBuf, config: ArtifactLookupConfig) -> Self {
        Self {
            api,
            output_dir,
            config,
        }
    }

    /// Run both stages in order. `None` when neither finds a file.
    pub async fn locate(&self, prompt_id: &str) -> Option<VideoArtifact> {
        if let Some(artifact) = self.from_history(prompt_id).await {
            return Some(artifact);
        }
        tracing::info!(prompt_id, "No usable history output, scanning output directory");
        self.from_filesystem().await
    }

    /// History stage. Retries while the prompt is not yet recorded.
    pub async fn from_history(&self, prompt_id: &str) -> Option<VideoArtifact> {
        let started = Instant::now();

        loop {
            let history = match self.api.get_history(prompt_id).await {
                Ok(history) => history,
                Err(e) => {
                    tracing::warn!(prompt_id, error = %e, "History lookup failed");
                    return None;
                }
            };

            match video_outputs(&history, prompt_id) {
                Some(refs) => {
                    for output in &refs {
                        let Some(path) = output.resolve(&self.output_dir) else {
                            continue;
                        };
                        match file_artifact(&path, ArtifactSource::History).await {
                            Some(artifact) => {
                                tracing::info!(
                                    prompt_id,
                                    node_id = %output.node_id,
                                    path = %artifact.path.display(),
                                    size = artifact.size,
                                    "Found video in history",
                                );
                                return Some(artifact);
                            }
                            None => {
                                tracing::warn!(
                                    prompt_id,
                                    node_id = %output.node_id,
                                    path = %path.display(),
                                    "History references a file that does not exist",
                                );
                            }
                        }
                    }
                    tracing::info!(prompt_id, outputs = refs.len(), "History has no usable video output");
                    return None;
                }
                None => {
                    tracing::debug!(prompt_id, "Prompt not in history yet");
                }
            }

            if started.elapsed() + self.config.history_interval >= self.config.history_budget {
                tracing::warn!(prompt_id, "Prompt never appeared in history");
                return None;
            }
            tokio::time::sleep(self.config.history_interval).await;
        }
    }

    /// Fallback stage. Rescans until a file shows up or the settle
    /// budget is spent.
    pub async fn from_filesystem(&self) -> Option<VideoArtifact> {
        let started = Instant::now();

        loop {
            let found = find_recent_video(
                &self.output_dir,
                self.config.fallback_window,
                SystemTime::now(),
            )
            .await;

            if let Some(candidate) = found {
                tracing::info!(
                    path = %candidate.path.display(),
                    priority = candidate.priority,
                    size = candidate.size,
                    "Found video by directory scan",
                );
                return Some(VideoArtifact {
                    path: candidate.path,
                    source: ArtifactSource::FilesystemScan,
                    size: candidate.size,
                    modified: Some(Timestamp::from(candidate.modified)),
                });
            }

            if started.elapsed() + self.config.settle_interval >= self.config.settle_budget {
                return None;
            }
            tokio::time::sleep(self.config.settle_interval).await;
        }
    }
}

async fn file_artifact(path: &Path, source: ArtifactSource) -> Option<VideoArtifact> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    Some(VideoArtifact {
        path: path.to_path_buf(),
        source,
        size: metadata.len(),
        modified: metadata.modified().ok().map(Timestamp::from),
    })
}
