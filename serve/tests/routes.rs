//! Route-level tests that need no upstream: health, auth, id echo, and the
//! error payload shape.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use serve::{router, AppState};
use weft::Settings;

fn test_settings() -> Settings {
    let mut settings = Settings::from_env();
    settings.enable_openai_compatible_api = false;
    settings.enable_auth = true;
    settings.enable_llm_billing = false;
    settings.enable_deepseek = false;
    settings.enable_gigachat = false;
    settings.enable_ollama = false;
    settings.enable_server_info_endpoint = true;
    settings
}

fn app() -> axum::Router {
    router(AppState::new(test_settings()).expect("app state"))
}

async fn body_json(body: Body) -> Value {
    let bytes = to_bytes(body, usize::MAX).await.expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_returns_healthy() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json, serde_json::json!({ "status": "healthy" }));
}

#[tokio::test]
async fn request_id_is_echoed_verbatim() {
    let response = app()
        .oneshot(
            Request::get("/health")
                .header("x-request-id", "req-custom-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-custom-42"
    );
}

#[tokio::test]
async fn request_id_is_generated_when_absent() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let header = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(uuid::Uuid::parse_str(&header).is_ok(), "not a uuid: {header}");
}

#[tokio::test]
async fn chat_without_api_key_is_401() {
    let response = app()
        .oneshot(
            Request::post("/api/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"model":"deepseek/deepseek-chat","messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["error"]["code"], 401);
    assert_eq!(json["error"]["message"], "Authentication required");
}

#[tokio::test]
async fn malformed_model_id_is_400() {
    let response = app()
        .oneshot(
            Request::post("/api/v1/chat/completions")
                .header("content-type", "application/json")
                .header("authorization", "Bearer sk-test")
                .body(Body::from(
                    r#"{"model":"no-provider-segment","messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["error"]["code"], 400);
}

#[tokio::test]
async fn disabled_provider_is_403() {
    let response = app()
        .oneshot(
            Request::post("/api/v1/chat/completions")
                .header("content-type", "application/json")
                .header("authorization", "Bearer sk-test")
                .body(Body::from(
                    r#"{"model":"gigachat/GigaChat-Pro","messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["error"]["details"]["provider_alias"], "gigachat");
}

#[tokio::test]
async fn info_endpoints_report_configuration() {
    let response = app()
        .oneshot(Request::get("/api/v1/info/json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["object"], "server");
    assert_eq!(json["features"]["billing"], false);

    let response = app()
        .oneshot(Request::get("/info/table").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let table = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(table.starts_with('+'), "not a table: {table}");
    assert!(table.contains("api mode"));
}

#[tokio::test]
async fn models_endpoint_lists_nothing_when_all_disabled() {
    let response = app()
        .oneshot(Request::get("/api/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["data"], serde_json::json!([]));
}
