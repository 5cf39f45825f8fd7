use std::net::SocketAddr;

use genchat_app::{AppState, build_router, config::AppConfig};
use genchat_observability::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing("genchat-app");

    let config = AppConfig::from_env().expect("configuration must be valid");
    let state = AppState::from_config(&config);
    let app = build_router(state);

    let addr: SocketAddr =
        format!("{}:{}", config.host, config.port).parse().expect("socket address must be valid");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("listener must bind");
    info!(event = "app.listening", addr = %addr, mock_providers = config.mock_providers);
    axum::serve(listener, app).await.expect("server must run");
}
