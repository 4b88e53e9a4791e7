//! Weft: multi-provider LLM gateway core.
//!
//! One internal chat-completion model sits between several inbound dialects
//! (OpenAI Chat, OpenAI Responses, GigaChat v1/v2, the native gateway shape)
//! and several upstream wire formats (OpenAI-compatible, GigaChat, Yandex,
//! Ollama). Requests flow through a fixed handler chain (transform,
//! tokenize, billing hold, completion, usage record) with streaming
//! normalization on the way back out.
//!
//! The HTTP surface lives in the `serve` crate; this crate owns everything
//! from dialect-agnostic request handling down to the upstream SSE clients.

pub mod billing;
pub mod cache;
pub mod catalog;
pub mod chain;
pub mod dialect;
pub mod error;
pub mod mappers;
pub mod message;
pub mod providers;
pub mod reasoning;
pub mod request;
pub mod response;
pub mod service;
pub mod settings;
pub mod sse;
pub mod tools;

pub use error::GatewayError;
pub use service::ChatCompletionService;
pub use settings::Settings;
