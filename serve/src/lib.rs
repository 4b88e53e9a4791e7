//! HTTP surface for the Weft gateway.
//!
//! Thin axum endpoints over the core pipeline: each route parses its dialect,
//! drives the chat-completion service once, and reshapes the result back.
//! Streaming responses are `text/event-stream` framed as `data: <json>\n\n`
//! and terminated by `data: [DONE]\n\n`.

pub mod app;
pub mod error;
pub mod identity;
pub mod request_id;
pub mod routes;
pub mod sse;

pub use app::{router, AppState};
