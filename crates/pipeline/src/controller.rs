//! Job orchestration.
//!
//! [`Pipeline::run`] takes one raw job input through resolve, bind,
//! readiness, submit, monitor and deliver, strictly in that order, and
//! always returns a [`JobOutcome`]. It is the only place errors are
//! turned into results.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use vidgen_comfyui::api::ComfyUIApi;
use vidgen_comfyui::client::ComfyUIClient;
use vidgen_comfyui::monitor::{wait_for_completion, ExecutionState};
use vidgen_comfyui::readiness::await_ready;
use vidgen_core::naming::video_filename;
use vidgen_core::request::{is_warmup_job, ImageSource, JobRequest};
use vidgen_core::types::{new_client_id, new_task_id};

use crate::artifact::ArtifactLocator;
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::delivery::{DeliveryResult, StorageClient};
use crate::error::PipelineError;
use crate::input::{InputResolver, END_IMAGE_NAME, START_IMAGE_NAME};
use crate::template::{BindParams, WorkflowTemplate};

/// Message returned for the warm-up job.
pub const SKIPPED_MESSAGE: &str = "Test job skipped";

/// Result object handed back to the dispatch runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Success {
        video_url: String,
        task_id: String,
        filename: String,
    },
    Failure {
        error: String,
        error_type: String,
        task_id: String,
    },
    Skipped {
        status: String,
        message: String,
    },
}

impl JobOutcome {
    fn skipped() -> Self {
        Self::Skipped {
            status: "skipped".into(),
            message: SKIPPED_MESSAGE.into(),
        }
    }

    fn failure(task_id: &str, err: &PipelineError) -> Self {
        Self::Failure {
            error: err.to_string(),
            error_type: err.kind().to_string(),
            task_id: task_id.to_string(),
        }
    }

    /// Failure for a job that could not even be read, under a fresh
    /// task id.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::Failure {
            error: message.into(),
            error_type: "ValidationError".into(),
            task_id: new_task_id(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Runs jobs against one ComfyUI instance and one storage zone.
pub struct Pipeline {
    config: PipelineConfig,
    api: ComfyUIApi,
    client: ComfyUIClient,
    inputs: InputResolver,
    storage: StorageClient,
    client_id: String,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let client = ComfyUIClient::for_address(&config.server_address, config.comfyui_port);
        let api = ComfyUIApi::new(client.api_url().to_string())
            .with_request_timeout(config.engine_request_timeout);
        Self::with_parts(config, api, client)
    }

    /// Build a pipeline against explicit engine endpoints.
    pub fn with_parts(config: PipelineConfig, api: ComfyUIApi, client: ComfyUIClient) -> Self {
        let inputs = InputResolver::new(config.download_timeout);
        let storage = StorageClient::new(config.storage.clone());
        Self {
            config,
            api,
            client,
            inputs,
            storage,
            client_id: new_client_id(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Process one job input. Never fails; errors become
    /// [`JobOutcome::Failure`].
    pub async fn run(&self, input: &Value) -> JobOutcome {
        if is_warmup_job(input) {
            tracing::info!("Skipping warm-up job");
            return JobOutcome::skipped();
        }

        let ctx = RunContext::new(&self.client_id, &self.config.work_root);
        tracing::info!(task_id = %ctx.task_id, client_id = %ctx.client_id, "Job started");

        let result = self.execute(&ctx, input).await;
        ctx.cleanup().await;

        match result {
            Ok(delivered) => {
                tracing::info!(task_id = %ctx.task_id, video_url = %delivered.public_url, "Job finished");
                JobOutcome::Success {
                    video_url: delivered.public_url,
                    task_id: ctx.task_id,
                    filename: delivered.filename,
                }
            }
            Err(err) => {
                tracing::error!(
                    task_id = %ctx.task_id,
                    error_type = err.kind(),
                    error = %err,
                    "Job failed",
                );
                JobOutcome::failure(&ctx.task_id, &err)
            }
        }
    }

    async fn execute(&self, ctx: &RunContext, input: &Value) -> Result<DeliveryResult, PipelineError> {
        let mut job = JobRequest::from_input(input)?;
        let dropped = job.truncate_lora_pairs();
        if dropped > 0 {
            tracing::warn!(task_id = %ctx.task_id, dropped, "Ignoring LoRA pairs beyond the first four");
        }

        // Resolve
        let start_source = job.image_source().unwrap_or_else(|| {
            tracing::info!(
                path = %self.config.default_image_path.display(),
                "No input image supplied, using default",
            );
            ImageSource::Path(self.config.default_image_path.to_string_lossy().into_owned())
        });
        let start_image = self.resolve_image(ctx, &start_source, START_IMAGE_NAME).await?;
        let end_image = match job.end_image_source() {
            Some(source) => Some(self.resolve_image(ctx, &source, END_IMAGE_NAME).await?),
            None => None,
        };

        // Bind
        let params = BindParams::from_job(&job, &start_image, end_image.as_deref())?;
        let template =
            WorkflowTemplate::load(params.variant(), self.config.workflow_dir.as_deref()).await?;
        let bound = template.bind(&params)?;

        // Readiness
        let mut conn = await_ready(
            &self.api,
            &self.client,
            &ctx.client_id,
            &self.config.readiness,
        )
        .await?;

        // Submit
        let submitted = self.api.submit_workflow(&bound.graph, &ctx.client_id).await?;
        let prompt_id = submitted.prompt_id;
        if submitted
            .node_errors
            .as_object()
            .is_some_and(|errors| !errors.is_empty())
        {
            tracing::warn!(prompt_id = %prompt_id, node_errors = %submitted.node_errors, "Prompt queued with node errors");
        }
        tracing::info!(
            task_id = %ctx.task_id,
            prompt_id = %prompt_id,
            queue_number = submitted.number,
            state = ExecutionState::Submitted.as_str(),
            "Workflow submitted",
        );

        // Monitor
        tracing::info!(prompt_id = %prompt_id, state = ExecutionState::Executing.as_str(), "Waiting for completion");
        let outcome =
            wait_for_completion(&mut conn.ws_stream, &prompt_id, &self.config.monitor).await?;
        tracing::info!(
            prompt_id = %prompt_id,
            state = outcome.state.as_str(),
            messages = outcome.messages,
            "Execution monitor finished",
        );
        if let Err(e) = conn.ws_stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }

        let locator = ArtifactLocator::new(
            self.api.clone(),
            self.config.output_dir.clone(),
            self.config.lookup,
        );
        let artifact = locator.locate(&prompt_id).await.ok_or_else(|| {
            PipelineError::Engine(format!("No video artifact found for prompt {prompt_id}"))
        })?;
        tracing::info!(
            path = %artifact.path.display(),
            source = artifact.source.as_str(),
            size = artifact.size,
            "Video artifact located",
        );

        // Deliver
        let filename = video_filename(&ctx.task_id);
        Ok(self.storage.deliver(&artifact.path, &filename).await?)
    }

    async fn resolve_image(
        &self,
        ctx: &RunContext,
        source: &ImageSource,
        name: &str,
    ) -> Result<PathBuf, PipelineError> {
        tracing::debug!(task_id = %ctx.task_id, kind = source.kind(), name, "Resolving image");
        Ok(self.inputs.resolve(source, &ctx.work_dir, name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offline_pipeline() -> Pipeline {
        let work = std::env::temp_dir();
        let config = PipelineConfig {
            work_root: work,
            ..PipelineConfig::default()
        };
        // Port 9 (discard) is never a ComfyUI; nothing here reaches it.
        Pipeline::with_parts(
            config,
            ComfyUIApi::new("http://127.0.0.1:9".into()),
            ComfyUIClient::for_address("127.0.0.1", 9),
        )
    }

    #[test]
    fn outcomes_serialize_flat() {
        let success = JobOutcome::Success {
            video_url: "https://cdn/x.mp4".into(),
            task_id: "task_1".into(),
            filename: "x.mp4".into(),
        };
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({"video_url": "https://cdn/x.mp4", "task_id": "task_1", "filename": "x.mp4"})
        );
        assert_eq!(
            serde_json::to_value(JobOutcome::skipped()).unwrap(),
            json!({"status": "skipped", "message": SKIPPED_MESSAGE})
        );
    }

    #[test]
    fn invalid_input_gets_a_task_id() {
        match JobOutcome::invalid_input("Job is not valid JSON") {
            JobOutcome::Failure {
                error_type,
                task_id,
                ..
            } => {
                assert_eq!(error_type, "ValidationError");
                assert!(task_id.starts_with("task_"));
            }
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn warmup_job_is_skipped() {
        let outcome = offline_pipeline()
            .run(&json!({"prompt": "test", "image_path": "/example_image.png"}))
            .await;
        assert_eq!(outcome, JobOutcome::skipped());
    }

    #[tokio::test]
    async fn unparseable_input_is_a_validation_failure() {
        let outcome = offline_pipeline().run(&json!({"seed": "abc"})).await;
        match outcome {
            JobOutcome::Failure {
                error_type,
                task_id,
                ..
            } => {
                assert_eq!(error_type, "ValidationError");
                assert!(task_id.starts_with("task_"));
            }
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_inline_image_is_an_input_failure() {
        let outcome = offline_pipeline()
            .run(&json!({"prompt": "x", "image_base64": "@@@"}))
            .await;
        assert!(matches!(
            outcome,
            JobOutcome::Failure { ref error_type, .. } if error_type == "InputError"
        ));
    }

    #[tokio::test]
    async fn non_numeric_width_fails_before_any_engine_call() {
        let outcome = offline_pipeline()
            .run(&json!({"prompt": "x", "image_path": "/in.png", "width": "wide"}))
            .await;
        assert!(matches!(
            outcome,
            JobOutcome::Failure { ref error_type, .. } if error_type == "ValidationError"
        ));
    }

    #[test]
    fn client_id_is_per_instance() {
        assert_ne!(offline_pipeline().client_id(), offline_pipeline().client_id());
    }
}
