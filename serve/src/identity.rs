//! Caller identity extraction.
//!
//! Authentication itself is middleware owned by an external service; this
//! module only reads what that middleware (or the bearer header) provides.
//! With `ENABLE_AUTH=false` a sentinel key is used so the pipeline still has
//! an api_key to thread through billing metadata.

use axum::http::HeaderMap;
use serde_json::json;
use weft::{GatewayError, Settings};

/// Sentinel api key used when authentication is disabled.
pub const AUTH_DISABLED_KEY: &str = "auth-disabled";

#[derive(Debug, Clone)]
pub struct Identity {
    pub api_key: String,
    pub user_id: Option<String>,
    pub origin: String,
}

/// Build the caller identity from headers. 401 when auth is on and no bearer
/// token is present.
pub fn extract_identity(
    headers: &HeaderMap,
    settings: &Settings,
) -> Result<Identity, GatewayError> {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string());

    let api_key = if !settings.enable_auth {
        bearer.unwrap_or_else(|| AUTH_DISABLED_KEY.to_string())
    } else {
        bearer.ok_or_else(|| {
            GatewayError::new(
                401,
                "Authentication required",
                json!({ "error": "Missing API key" }),
            )
        })?
    };

    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string());

    Ok(Identity {
        api_key,
        user_id,
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn settings(auth: bool) -> Settings {
        let mut s = Settings::from_env();
        s.enable_auth = auth;
        s
    }

    #[test]
    fn missing_key_is_401_when_auth_enabled() {
        let err = extract_identity(&HeaderMap::new(), &settings(true)).unwrap_err();
        assert_eq!(err.code, 401);
    }

    #[test]
    fn sentinel_key_when_auth_disabled() {
        let identity = extract_identity(&HeaderMap::new(), &settings(false)).unwrap();
        assert_eq!(identity.api_key, AUTH_DISABLED_KEY);
        assert_eq!(identity.origin, "unknown");
    }

    #[test]
    fn bearer_and_origin_are_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-1"));
        headers.insert("origin", HeaderValue::from_static("https://app.example"));
        let identity = extract_identity(&headers, &settings(true)).unwrap();
        assert_eq!(identity.api_key, "sk-1");
        assert_eq!(identity.origin, "https://app.example");
    }
}
