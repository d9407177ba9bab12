use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod cookies;
pub mod gate;
pub mod handlers;
pub mod models;

pub mod routes;
use routes::{authenticated, public};

// --- Public Re-exports ---

pub use auth::{IdentityBackend, IdentityState, MockIdentityBackend, SupabaseAuth};
pub use config::{AppConfig, GateConfig};
pub use gate::{AccessDecision, GateState, PathClass, PathClassifier};

/// ApiDoc
///
/// OpenAPI document for the JSON endpoints, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(handlers::health, handlers::get_profile, handlers::logout),
    components(schemas(models::ProfileResponse)),
    tags((name = "crochet-storefront", description = "Storefront session endpoints"))
)]
struct ApiDoc;

/// AppState
///
/// The single immutable container shared by every request: the identity
/// backend and the loaded configuration.
#[derive(Clone)]
pub struct AppState {
    /// Identity Layer: confirms and rotates sessions (Supabase in production).
    pub identity: IdentityState,
    /// Configuration: the loaded, immutable environment configuration.
    pub config: AppConfig,
}

impl FromRef<AppState> for IdentityState {
    fn from_ref(app_state: &AppState) -> IdentityState {
        app_state.identity.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for GateState {
    fn from_ref(app_state: &AppState) -> GateState {
        GateState::new(app_state.identity.clone(), &app_state.config.gate)
    }
}

/// create_router
///
/// Assembles the routes, puts the access gate in front of all of them, and
/// adds the observability layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // Built once; the middleware clones only the Arc-backed handle per request.
    let gate_state = GateState::from_ref(&state);

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes())
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .with_state(state)
        // The gate sees every request that reaches the router; static assets
        // are let through by the classifier's bypass list.
        .layer(middleware::from_fn_with_state(gate_state, gate::access_gate));

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span so every log line of one request, including
/// the gate's decision, carries the same request id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
