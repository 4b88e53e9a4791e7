//! Axum app: shared state and router wiring.

use std::sync::Arc;

use axum::http::header::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use weft::billing::BillingClient;
use weft::cache::{cache_for, Cache};
use weft::catalog::ModelCatalog;
use weft::providers::ProviderRegistry;
use weft::{GatewayError, Settings};

use crate::request_id::propagate_request_id;
use crate::routes;

/// Shared state injected into every route.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ProviderRegistry>,
    pub catalog: Arc<ModelCatalog>,
    pub cache: Arc<dyn Cache>,
    /// Present only when billing is enabled and configured.
    pub billing: Option<Arc<BillingClient>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, GatewayError> {
        let settings = Arc::new(settings);
        let registry = Arc::new(ProviderRegistry::new(Arc::clone(&settings)));
        let cache = cache_for(settings.enable_cache);
        let catalog = Arc::new(ModelCatalog::new(
            Arc::clone(&settings),
            Arc::clone(&registry),
            Arc::clone(&cache),
        ));
        let billing = if settings.enable_llm_billing && !settings.billing_base_url.is_empty() {
            Some(Arc::new(BillingClient::new(&settings)?))
        } else {
            None
        };
        Ok(AppState {
            settings,
            registry,
            catalog,
            cache,
            billing,
        })
    }
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    if settings.backend_cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = settings
            .backend_cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Build the router for the configured API mode.
pub fn router(state: AppState) -> Router {
    let openai_compatible = state.settings.enable_openai_compatible_api;

    let mut router = Router::new().route("/health", get(routes::health::health));

    if openai_compatible {
        router = router
            .route("/v1/chat/completions", post(routes::chat::chat_completions))
            .route("/v1/responses", post(routes::responses::create_response))
            .route("/v1/models", get(routes::models::get_models));
    } else {
        router = router
            .route(
                "/api/v1/chat/completions",
                post(routes::chat::chat_completions),
            )
            .route("/api/v1/responses", post(routes::responses::create_response))
            .route("/api/v1/models", get(routes::models::get_models));
    }

    router = router
        .route(
            "/api/v1/gigachat/completions",
            post(routes::gigachat::create_v1_completion),
        )
        .route(
            "/api/v2/gigachat/completions",
            post(routes::gigachat::create_v2_completion),
        );

    if state.settings.enable_server_info_endpoint {
        router = router
            .route("/api/v1/info/json", get(routes::info::info_json))
            .route("/info/table", get(routes::info::info_table));
    }

    let cors = cors_layer(&state.settings);
    router
        .layer(middleware::from_fn(propagate_request_id))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
