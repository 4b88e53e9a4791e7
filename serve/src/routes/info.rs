//! Server-info endpoints, behind `ENABLE_SERVER_INFO_ENDPOINT`.

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use weft::providers::provider_name;

use crate::app::AppState;

fn info_payload(state: &AppState) -> Value {
    let settings = &state.settings;
    let enabled_providers: Vec<Value> = state
        .registry
        .enabled_providers()
        .into_iter()
        .map(|id| json!({ "id": id, "name": provider_name(id) }))
        .collect();

    json!({
        "object": "server",
        "server_info": {
            "name": settings.project_name,
            "version": settings.version,
            "api_mode": if settings.enable_openai_compatible_api { "openai-compatible" } else { "llm-gateway" },
        },
        "providers": enabled_providers,
        "features": {
            "auth": settings.enable_auth,
            "service_auth": settings.enable_service_auth,
            "billing": settings.enable_llm_billing,
            "cache": settings.enable_cache,
        },
        "cache": {
            "backend": if settings.enable_cache { "memory" } else { "disabled" },
            "prefix": settings.cache_prefix,
            "ttl": settings.cache_ttl,
            "redis_url": settings.redis.url(),
        },
        "billing": {
            "configured": !settings.billing_base_url.is_empty(),
        },
        "timeouts": {
            "provider": settings.provider_timeout,
            "auth_service": settings.auth_service_timeout,
        },
    })
}

/// `GET /api/v1/info/json`
pub async fn info_json(State(state): State<AppState>) -> Json<Value> {
    Json(info_payload(&state))
}

/// `GET /info/table`: the same data as an ASCII table.
pub async fn info_table(State(state): State<AppState>) -> String {
    let info = info_payload(&state);
    let mut rows: Vec<(String, String)> = vec![
        (
            "server".to_string(),
            format!(
                "{} {}",
                info["server_info"]["name"].as_str().unwrap_or(""),
                info["server_info"]["version"].as_str().unwrap_or(""),
            ),
        ),
        (
            "api mode".to_string(),
            info["server_info"]["api_mode"].as_str().unwrap_or("").to_string(),
        ),
        (
            "providers".to_string(),
            info["providers"]
                .as_array()
                .map(|providers| {
                    providers
                        .iter()
                        .filter_map(|p| p["id"].as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default(),
        ),
        (
            "billing".to_string(),
            info["features"]["billing"].to_string(),
        ),
        ("cache".to_string(), info["cache"]["backend"].as_str().unwrap_or("").to_string()),
    ];
    rows.retain(|(_, v)| !v.is_empty());

    let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let value_width = rows.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    let border = format!("+-{}-+-{}-+", "-".repeat(key_width), "-".repeat(value_width));

    let mut table = String::new();
    table.push_str(&border);
    table.push('\n');
    for (key, value) in &rows {
        table.push_str(&format!(
            "| {key:key_width$} | {value:value_width$} |\n"
        ));
    }
    table.push_str(&border);
    table.push('\n');
    table
}
