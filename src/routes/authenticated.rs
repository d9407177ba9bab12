use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Routes that act on the caller's session. `/protected` sits under a
/// protected prefix, so the gate has already redirected anonymous callers;
/// the handler re-checks the session it receives.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /protected
        // The signed-in user's profile.
        .route("/protected", get(handlers::get_profile))
        // POST /auth/logout
        // Ends the session with the identity backend and clears its cookies.
        .route("/auth/logout", post(handlers::logout))
}
