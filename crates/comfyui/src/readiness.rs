//! Bounded readiness checks for a ComfyUI instance.
//!
//! Before a workflow is submitted the worker waits for ComfyUI to
//! answer over HTTP, then opens the WebSocket used for progress
//! events. Each phase retries at a fixed interval until its budget is
//! spent. The phases run strictly one after the other.

use std::time::Duration;

use tokio::time::Instant;

use crate::api::ComfyUIApi;
use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Fixed-interval retry with an overall time budget.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Pause between attempts.
    pub interval: Duration,
    /// Total time allowed before giving up.
    pub budget: Duration,
}

/// Tunables for both readiness phases.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessConfig {
    /// HTTP liveness probe retries.
    pub http: RetryPolicy,
    /// Per-request timeout of a single HTTP probe.
    pub probe_timeout: Duration,
    /// WebSocket connection retries.
    pub websocket: RetryPolicy,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            http: RetryPolicy {
                interval: Duration::from_secs(1),
                budget: Duration::from_secs(180),
            },
            probe_timeout: Duration::from_secs(5),
            websocket: RetryPolicy {
                interval: Duration::from_secs(5),
                budget: Duration::from_secs(180),
            },
        }
    }
}

/// ComfyUI did not become reachable within the configured budget.
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("ComfyUI HTTP not ready after {attempts} attempts in {waited_secs}s: {last_error}")]
    Http {
        attempts: u32,
        waited_secs: u64,
        last_error: String,
    },

    #[error("ComfyUI WebSocket not connectable after {attempts} attempts in {waited_secs}s: {last_error}")]
    WebSocket {
        attempts: u32,
        waited_secs: u64,
        last_error: String,
    },
}

/// Poll `GET /` until ComfyUI answers or the HTTP budget is spent.
pub async fn await_http_ready(
    api: &ComfyUIApi,
    config: &ReadinessConfig,
) -> Result<(), ReadinessError> {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match api.probe(config.probe_timeout).await {
            Ok(()) => {
                tracing::info!(
                    attempts,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "ComfyUI HTTP is ready",
                );
                return Ok(());
            }
            Err(e) => e.to_string(),
        };

        tracing::debug!(
            attempts,
            waited_secs = started.elapsed().as_secs(),
            error = %last_error,
            "Waiting for ComfyUI HTTP",
        );

        if !has_time_for_another(started, &config.http) {
            return Err(ReadinessError::Http {
                attempts,
                waited_secs: started.elapsed().as_secs(),
                last_error,
            });
        }
        tokio::time::sleep(config.http.interval).await;
    }
}

/// Open the progress WebSocket as `client_id`, retrying within `policy`.
pub async fn connect_with_retry(
    client: &ComfyUIClient,
    client_id: &str,
    policy: &RetryPolicy,
) -> Result<ComfyUIConnection, ReadinessError> {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match client.connect(client_id).await {
            Ok(conn) => return Ok(conn),
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            attempts,
            error = %last_error,
            "WebSocket connect attempt {attempts} failed",
        );

        if !has_time_for_another(started, policy) {
            return Err(ReadinessError::WebSocket {
                attempts,
                waited_secs: started.elapsed().as_secs(),
                last_error,
            });
        }
        tokio::time::sleep(policy.interval).await;
    }
}

/// Run both readiness phases in order and hand back the live socket.
pub async fn await_ready(
    api: &ComfyUIApi,
    client: &ComfyUIClient,
    client_id: &str,
    config: &ReadinessConfig,
) -> Result<ComfyUIConnection, ReadinessError> {
    await_http_ready(api, config).await?;
    connect_with_retry(client, client_id, &config.websocket).await
}

/// Whether sleeping one more interval still fits inside the budget.
fn has_time_for_another(started: Instant, policy: &RetryPolicy) -> bool {
    started.elapsed() + policy.interval < policy.budget
}
