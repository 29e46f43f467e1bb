//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, the WebSocket handshake, HTTP API
//! wrappers, bounded readiness retries, the completion monitor, and
//! history output extraction for driving a single ComfyUI server.

pub mod api;
pub mod client;
pub mod history;
pub mod messages;
pub mod monitor;
pub mod readiness;
