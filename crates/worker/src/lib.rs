//! Job intake for the worker binary.
//!
//! The dispatch runtime hands the worker one job, either as the bare
//! input object or wrapped as `{"id": ..., "input": {...}}`. The job is
//! read from a file path argument or, without one, from stdin.

use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "vidgen_worker=info,vidgen_pipeline=info,vidgen_comfyui=info";

/// A job as delivered by the dispatch runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEnvelope {
    /// Runtime-assigned job id, when the job came wrapped.
    pub id: Option<String>,
    pub input: Value,
}

#[derive(Deserialize)]
struct WrappedJob {
    #[serde(default)]
    id: Option<Value>,
    input: Value,
}

/// Parse job text into an envelope.
///
/// An object carrying an `input` object is treated as wrapped; any
/// other object is the input itself.
pub fn parse_envelope(text: &str) -> anyhow::Result<JobEnvelope> {
    let value: Value = serde_json::from_str(text).context("Job is not valid JSON")?;
    if !value.is_object() {
        bail!("Job must be a JSON object");
    }

    if value.get("input").is_some_and(Value::is_object) {
        let wrapped: WrappedJob = serde_json::from_value(value)?;
        let id = wrapped.id.and_then(|id| match id {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        });
        return Ok(JobEnvelope {
            id,
            input: wrapped.input,
        });
    }

    Ok(JobEnvelope {
        id: None,
        input: value,
    })
}

/// Read the raw job from `path`, or from stdin when `None`.
pub async fn read_job_text(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read job file {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read job from stdin")?;
            Ok(text)
        }
    }
}

/// Install the global subscriber. Logs go to stderr; stdout is kept
/// for the result JSON. `LOG_FORMAT=json` selects structured output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
