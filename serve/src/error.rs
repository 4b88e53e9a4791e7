//! Gateway error → HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use weft::GatewayError;

/// Wrapper so [`GatewayError`] can be returned from handlers.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_codes_collapse_to_500() {
        let response =
            ApiError(GatewayError::new(42, "x", serde_json::json!({}))).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError(GatewayError::new(402, "x", serde_json::json!({})))
            .into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }
}
