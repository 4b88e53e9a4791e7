//! Gateway server entry point.

use tracing::info;
use tracing_subscriber::EnvFilter;

use serve::{router, AppState};
use weft::Settings;

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.to_lowercase()));
    match settings.log_format.as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Populate the environment from .env / XDG config before reading it.
    config::load_and_apply("weft", None)?;
    let settings = Settings::from_env();
    init_tracing(&settings);

    let addr = format!("{}:{}", settings.host, settings.port);
    let state = AppState::new(settings)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "weft gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
