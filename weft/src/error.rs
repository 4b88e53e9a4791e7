//! Gateway error type.
//!
//! Every component raises [`GatewayError`] with an HTTP-ish `code`, a human
//! message, and a structured `details` object. The HTTP surface serializes it
//! as `{"error": {"code", "message", "details"}}`.

use serde_json::{json, Value};
use thiserror::Error;

/// Structured gateway error carried through mappers, drivers, and the chain.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GatewayError {
    /// HTTP status the error surfaces as (400, 402, 403, 404, 408, 500, 503).
    pub code: u16,
    /// Human-readable message.
    pub message: String,
    /// Free-form structured details for the error payload.
    pub details: Value,
}

impl GatewayError {
    /// Build an error with explicit code, message, and details.
    pub fn new(code: u16, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
        }
    }

    /// 400 with a single `error` detail string.
    pub fn bad_request(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(400, message, json!({ "error": detail.into() }))
    }

    /// 500 wrapping an unexpected failure.
    pub fn internal(message: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::new(500, message, json!({ "error": detail.to_string() }))
    }

    /// JSON body for the HTTP error payload.
    pub fn to_body(&self) -> Value {
        json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        })
    }

    /// SSE error frame body: an `error` object followed by `[DONE]` is emitted
    /// by the surface when the failure happens after the first streamed byte.
    pub fn to_stream_body(&self) -> Value {
        json!({
            "error": {
                "message": self.message,
                "type": if self.code == 500 { "internal_error" } else { "provider_error" },
                "code": self.code,
                "details": self.details,
            }
        })
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::internal("Serialization error", err)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let code = err
            .status()
            .map(|s| s.as_u16())
            .unwrap_or(if err.is_timeout() { 408 } else { 503 });
        GatewayError::new(
            code,
            format!("Upstream request failed: {err}"),
            json!({ "error": err.to_string(), "network_error": err.status().is_none() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_code_message_details() {
        let err = GatewayError::bad_request("Invalid model", "bad id");
        let body = err.to_body();
        assert_eq!(body["error"]["code"], 400);
        assert_eq!(body["error"]["message"], "Invalid model");
        assert_eq!(body["error"]["details"]["error"], "bad id");
    }

    #[test]
    fn stream_body_distinguishes_internal_errors() {
        let err = GatewayError::internal("boom", "cause");
        assert_eq!(err.to_stream_body()["error"]["type"], "internal_error");
        let err = GatewayError::new(402, "Usage limit exceeded", json!({}));
        assert_eq!(err.to_stream_body()["error"]["type"], "provider_error");
    }

    #[test]
    fn display_is_the_message() {
        let err = GatewayError::new(403, "Provider disabled", json!({}));
        assert_eq!(err.to_string(), "Provider disabled");
    }
}
