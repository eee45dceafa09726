pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tandem_db::PersistenceGateway;
use tandem_gateway::{CredentialVerifier, Gateway, connection};

use crate::config::Config;

/// Cookie carrying the refresh token for handshake-time admission.
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Clone)]
struct ServerState {
    gateway: Gateway,
}

pub fn build_gateway(config: &Config, store: Arc<dyn PersistenceGateway>) -> Gateway {
    let verifier = CredentialVerifier::new(&config.access_token_secret, &config.refresh_token_secret);
    Gateway::new(store, verifier, config.gateway_config())
}

/// The WebSocket endpoint is served on `/` and `/gateway`.
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState { gateway })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<ServerState>, jar: CookieJar, ws: WebSocketUpgrade) -> impl IntoResponse {
    let refresh_cookie = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty());

    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.gateway, refresh_cookie))
}
