use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints that never need a session. The access gate still runs in front
/// of them so rotated session cookies reach the browser.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /
        // Storefront landing text.
        .route("/", get(handlers::home))
        // GET /health
        // Returns "ok" immediately to verify the service is running and responsive.
        .route("/health", get(handlers::health))
}
