//! Completion monitor for a submitted prompt.
//!
//! Reads frames from a ComfyUI WebSocket, parses them into typed
//! [`ComfyUIMessage`] variants, and stops when the completion sentinel
//! for the watched prompt arrives. Everything else is logged and
//! skipped. The wait is bounded both by a message count and by a
//! wall-clock ceiling; running out of either is a timeout, not an
//! error, so the caller can still try to recover the output.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::messages::{parse_message, ComfyUIMessage};

/// Default cap on frames read while waiting for completion.
pub const DEFAULT_MAX_MESSAGES: usize = 600;

/// Default wall-clock ceiling for a single execution.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1800);

/// Bounds on how long the monitor listens.
#[derive(Debug, Clone, Copy)]
pub struct MonitorLimits {
    pub max_messages: usize,
    pub max_wait: Duration,
}

impl Default for MonitorLimits {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Lifecycle of one execution handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Submitted,
    Executing,
    Completed,
    TimedOut,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Which limit ended a wait without a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutReason {
    MessageBudget,
    WallClock,
}

/// How the wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOutcome {
    /// Either [`ExecutionState::Completed`] or [`ExecutionState::TimedOut`].
    pub state: ExecutionState,
    /// Set when `state` is [`ExecutionState::TimedOut`].
    pub timeout: Option<TimeoutReason>,
    /// Frames read, of any kind.
    pub messages: usize,
}

/// Transport failures while listening.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("WebSocket receive error: {0}")]
    Receive(#[from] tungstenite::Error),

    #[error("WebSocket closed before prompt {prompt_id} completed")]
    Closed { prompt_id: String },
}

/// Listen on `ws_stream` until `prompt_id` completes or a limit is hit.
///
/// Binary frames (preview images), pings, malformed JSON and unknown
/// message types never end the wait.
pub async fn wait_for_completion<S>(
    ws_stream: &mut S,
    prompt_id: &str,
    limits: &MonitorLimits,
) -> Result<MonitorOutcome, MonitorError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let deadline = Instant::now() + limits.max_wait;
    let mut messages = 0usize;

    loop {
        if messages >= limits.max_messages {
            return Ok(timed_out(prompt_id, TimeoutReason::MessageBudget, messages));
        }

        let next = match tokio::time::timeout_at(deadline, ws_stream.next()).await {
            Ok(next) => next,
            Err(_) => return Ok(timed_out(prompt_id, TimeoutReason::WallClock, messages)),
        };

        let frame = match next {
            Some(frame) => frame?,
            None => {
                return Err(MonitorError::Closed {
                    prompt_id: prompt_id.to_string(),
                })
            }
        };
        messages += 1;

        match frame {
            Message::Text(text) => {
                if handle_text_message(&text, prompt_id) {
                    tracing::info!(prompt_id, messages, "Execution completed (all nodes done)");
                    return Ok(MonitorOutcome {
                        state: ExecutionState::Completed,
                        timeout: None,
                        messages,
                    });
                }
            }
            Message::Binary(_) => {
                tracing::trace!(prompt_id, "Ignoring binary message (preview image)");
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Handled automatically by tungstenite.
            }
            Message::Close(frame) => {
                tracing::warn!(prompt_id, ?frame, "ComfyUI WebSocket closed");
                return Err(MonitorError::Closed {
                    prompt_id: prompt_id.to_string(),
                });
            }
            Message::Frame(_) => {}
        }
    }
}

fn timed_out(prompt_id: &str, reason: TimeoutReason, messages: usize) -> MonitorOutcome {
    tracing::warn!(
        prompt_id,
        messages,
        ?reason,
        "No completion signal within budget, continuing with output lookup",
    );
    MonitorOutcome {
        state: ExecutionState::TimedOut,
        timeout: Some(reason),
        messages,
    }
}

/// Log a single text frame. Returns `true` on the completion sentinel.
fn handle_text_message(text: &str, prompt_id: &str) -> bool {
    let msg = match parse_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, raw_message = %text, "Skipping unrecognised ComfyUI message");
            return false;
        }
    };

    if msg.is_completion_of(prompt_id) {
        return true;
    }

    match &msg {
        ComfyUIMessage::Executing(data) => {
            tracing::debug!(prompt_id = ?data.prompt_id, node = ?data.node, "Executing node");
        }
        ComfyUIMessage::Progress(data) => {
            tracing::debug!(
                node = ?data.node,
                value = data.value,
                max = data.max,
                percent = data.percent(),
                "Generation progress",
            );
        }
        ComfyUIMessage::Status(data) => {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
        }
        ComfyUIMessage::ExecutionStart(data) => {
            tracing::debug!(prompt_id = %data.prompt_id, "Execution started");
        }
        ComfyUIMessage::ExecutionCached(data) => {
            tracing::debug!(
                prompt_id = %data.prompt_id,
                cached_nodes = ?data.nodes,
                "Reusing cached node outputs",
            );
        }
        ComfyUIMessage::Executed(data) => {
            let output_keys: Vec<&str> = data
                .output
                .as_object()
                .map(|o| o.keys().map(String::as_str).collect())
                .unwrap_or_default();
            tracing::info!(
                prompt_id = %data.prompt_id,
                node = %data.node,
                outputs = ?output_keys,
                "Node produced output",
            );
        }
        ComfyUIMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
            tracing::error!(
                prompt_id,
                node_id = ?data.node_id,
                node_type = ?data.node_type,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error reported by ComfyUI",
            );
        }
        other => {
            tracing::debug!(kind = other.kind(), "ComfyUI event");
        }
    }
    false
}
