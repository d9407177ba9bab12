use axum::{
    Extension, Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};

use crate::{
    AppState,
    cookies::SessionCookies,
    models::{ProfileResponse, Session},
};

/// home
///
/// [Public Route] Landing text pointing anonymous visitors at login/sign-up.
pub async fn home() -> &'static str {
    "yaocrochets. Log in at /auth/login or sign up at /auth/sign-up to view your profile."
}

/// health
///
/// [Public Route] Liveness probe for load balancers.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = String))
)]
pub async fn health() -> &'static str {
    "ok"
}

/// get_profile
///
/// [Session Route] The signed-in user's profile. The access gate inserts the
/// session on every request it allows; if it let an anonymous caller through
/// (e.g. the prefix list was changed) the caller is sent to login instead.
#[utoipa::path(
    get,
    path = "/protected",
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 307, description = "No session, redirected to login")
    )
)]
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Response {
    match session {
        Session {
            present: true,
            user_id: Some(id),
            email,
        } => Json(ProfileResponse { id, email }).into_response(),
        _ => Redirect::temporary(&state.config.gate.login_path).into_response(),
    }
}

/// logout
///
/// [Session Route] Signs out through the identity backend and clears the
/// session cookies. A backend failure is logged but the cookies are still
/// cleared, so the browser ends up signed out either way.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 303, description = "Signed out, redirected home"))
)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut cookies = SessionCookies::from_headers(&headers);

    if let Err(e) = state.identity.sign_out(&mut cookies).await {
        tracing::warn!(error = %e, "sign out failed, clearing cookies anyway");
    }

    cookies.commit(Redirect::to("/").into_response())
}
