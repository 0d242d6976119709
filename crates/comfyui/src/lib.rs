//! ComfyUI WebSocket and REST client library.
//!
//! Provides prompt submission with gateway retry, per-job WebSocket
//! sessions, the message envelope, the job event stream that ends on the
//! prompt's completion signal, and a startup readiness wait.

pub mod api;
pub mod client;
pub mod messages;
pub mod readiness;
pub mod stream;

pub use api::{ComfyUIApi, ComfyUIApiError, RetryPolicy};
pub use client::{ComfyUIClient, ComfyUIClientError};
pub use messages::StreamEvent;
pub use stream::{ComfyUIBridge, EventStream, StreamError};
