use async_trait::async_trait;
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    middleware,
    response::Response,
    routing::get,
};
use crochet_storefront::{
    auth::{IdentityBackend, IdentityError, MockIdentityBackend},
    config::GateConfig,
    cookies::SessionCookies,
    gate::{self, AccessDecision, GateState, PathClass, PathClassifier},
    models::{Identity, Session},
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tower::util::ServiceExt;
use uuid::Uuid;

const TEST_USER_ID: Uuid = Uuid::from_u128(7);

// --- Helpers ---

fn signed_in() -> MockIdentityBackend {
    MockIdentityBackend::signed_in(Identity {
        id: TEST_USER_ID,
        email: Some("knitter@example.com".to_string()),
    })
}

/// A router with stand-in pages for each path group, behind the gate.
fn gated_app<B: IdentityBackend + 'static>(backend: B) -> Router {
    let gate_state = GateState::new(Arc::new(backend), &GateConfig::default());

    Router::new()
        .route("/", get(|| async { "home" }))
        .route("/products", get(|| async { "products" }))
        .route("/protected", get(|| async { "profile" }))
        .route("/protected/orders", get(|| async { "orders" }))
        .route("/auth/login", get(|| async { "login" }))
        .route("/auth/sign-up", get(|| async { "sign-up" }))
        .route("/auth/callback", get(|| async { "callback" }))
        .route("/auth/update-password", get(|| async { "update-password" }))
        .route("/static/logo.txt", get(|| async { "logo" }))
        .route(
            "/whoami",
            get(|Extension(session): Extension<Session>| async move {
                format!("{}:{:?}", session.present, session.user_id)
            }),
        )
        .route(
            "/echo-cookies",
            get(|headers: HeaderMap| async move {
                headers
                    .get(header::COOKIE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string()
            }),
        )
        .layer(middleware::from_fn_with_state(gate_state, gate::access_gate))
}

async fn send(app: Router, uri: &str, cookie: Option<&str>) -> Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Counts identity calls, to prove bypassed paths never reach the backend.
#[derive(Default)]
struct CountingBackend {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl IdentityBackend for CountingBackend {
    async fn current_user(&self, _cookies: &mut SessionCookies) -> Result<Identity, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(IdentityError::NoSession)
    }

    async fn sign_out(&self, _cookies: &mut SessionCookies) -> Result<(), IdentityError> {
        Ok(())
    }
}

// --- Path Classifier ---

#[test]
fn test_classifier_default_groups() {
    let classifier = PathClassifier::new(&GateConfig::default());

    assert_eq!(classifier.classify("/protected"), PathClass::Protected);
    assert_eq!(classifier.classify("/protected/orders"), PathClass::Protected);
    assert_eq!(classifier.classify("/auth/login"), PathClass::AuthPage);
    assert_eq!(classifier.classify("/auth/sign-up"), PathClass::AuthPage);
    assert_eq!(classifier.classify("/auth/sign-up-success"), PathClass::AuthPage);
    assert_eq!(classifier.classify("/products"), PathClass::Public);
    assert_eq!(classifier.classify("/wishlist"), PathClass::Public);
    assert_eq!(classifier.classify("/"), PathClass::Public);
}

#[test]
fn test_callback_and_password_reset_stay_public() {
    let classifier = PathClassifier::new(&GateConfig::default());

    assert_eq!(classifier.classify("/auth/callback"), PathClass::Public);
    assert_eq!(classifier.classify("/auth/callback?code=abc"), PathClass::Public);
    assert_eq!(classifier.classify("/auth/update-password"), PathClass::Public);
    assert_eq!(classifier.classify("/auth/forgot-password"), PathClass::Public);
}

#[test]
fn test_protected_wins_over_auth_page() {
    let config = GateConfig {
        protected_prefixes: vec!["/auth/sign-up/admin".to_string()],
        ..GateConfig::default()
    };
    let classifier = PathClassifier::new(&config);

    assert_eq!(classifier.classify("/auth/sign-up/admin"), PathClass::Protected);
    assert_eq!(classifier.classify("/auth/sign-up"), PathClass::AuthPage);
}

#[test]
fn test_classification_is_idempotent() {
    let classifier = PathClassifier::new(&GateConfig::default());
    for path in ["/protected", "/auth/login", "/auth/callback", "/products/12"] {
        assert_eq!(classifier.classify(path), classifier.classify(path));
    }
}

#[test]
fn test_static_asset_bypass() {
    let classifier = PathClassifier::new(&GateConfig::default());

    assert!(classifier.bypasses("/_next/static/chunk.js"));
    assert!(classifier.bypasses("/favicon.ico"));
    assert!(classifier.bypasses("/static/logo.txt"));
    assert!(classifier.bypasses("/thumbs-up-icon.jpg"));
    assert!(!classifier.bypasses("/thumbs-up-icon.JPG"));
    assert!(!classifier.bypasses("/protected/invoice.PNG"));
    assert!(classifier.bypasses("/products/hat.webp"));
    assert!(!classifier.bypasses("/protected"));
    assert!(!classifier.bypasses("/products"));
    assert!(!classifier.bypasses("/png"));
}

// --- Access Decision Engine ---

#[test]
fn test_decision_table() {
    use AccessDecision::*;
    use PathClass::*;

    let table = [
        (false, Protected, RedirectToLogin),
        (false, AuthPage, Allow),
        (false, Public, Allow),
        (true, Protected, Allow),
        (true, AuthPage, RedirectToLanding),
        (true, Public, Allow),
    ];

    for (present, class, expected) in table {
        assert_eq!(
            AccessDecision::decide(present, class),
            expected,
            "present={present} class={class:?}"
        );
    }
}

#[test]
fn test_redirect_target_keeps_query() {
    let gate_state = GateState::new(Arc::new(MockIdentityBackend::anonymous()), &GateConfig::default());

    assert_eq!(gate_state.redirect_target(AccessDecision::Allow, Some("a=1")), None);
    assert_eq!(
        gate_state.redirect_target(AccessDecision::RedirectToLogin, None).as_deref(),
        Some("/auth/login")
    );
    assert_eq!(
        gate_state
            .redirect_target(AccessDecision::RedirectToLanding, Some("next=%2Fwishlist"))
            .as_deref(),
        Some("/protected?next=%2Fwishlist")
    );
    assert_eq!(
        gate_state.redirect_target(AccessDecision::RedirectToLogin, Some("")).as_deref(),
        Some("/auth/login")
    );
}

// --- Session Refresher ---

#[tokio::test]
async fn test_refresh_session_folds_errors_into_anonymous() {
    let mut cookies = SessionCookies::default();

    let session = gate::refresh_session(&MockIdentityBackend::failing(), &mut cookies).await;
    assert_eq!(session, Session::anonymous());

    let session = gate::refresh_session(&MockIdentityBackend::anonymous(), &mut cookies).await;
    assert!(!session.present);

    let session = gate::refresh_session(&signed_in(), &mut cookies).await;
    assert!(session.present);
    assert_eq!(session.user_id, Some(TEST_USER_ID));
    assert_eq!(session.email.as_deref(), Some("knitter@example.com"));
}

// --- Middleware Scenarios ---

#[tokio::test]
async fn test_protected_without_session_redirects_to_login() {
    let response = send(gated_app(MockIdentityBackend::anonymous()), "/protected", None).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_nested_protected_path_redirects_with_query() {
    let response = send(
        gated_app(MockIdentityBackend::anonymous()),
        "/protected/orders?page=2",
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/auth/login?page=2");
}

#[tokio::test]
async fn test_backend_failure_fails_closed() {
    let response = send(gated_app(MockIdentityBackend::failing()), "/protected", Some("sb-x-auth-token=stale")).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_login_with_session_redirects_to_landing() {
    let response = send(gated_app(signed_in()), "/auth/login", Some("sb-x-auth-token=valid")).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/protected");

    let response = send(gated_app(signed_in()), "/auth/sign-up", Some("sb-x-auth-token=valid")).await;
    assert_eq!(location(&response), "/protected");
}

#[tokio::test]
async fn test_signed_in_user_reaches_protected_and_password_reset() {
    let response = send(gated_app(signed_in()), "/protected", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "profile");

    let response = send(gated_app(signed_in()), "/auth/update-password", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "update-password");
}

#[tokio::test]
async fn test_callback_reachable_in_both_states() {
    for backend in [MockIdentityBackend::anonymous(), signed_in()] {
        let response = send(gated_app(backend), "/auth/callback?code=xyz", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "callback");
    }
}

#[tokio::test]
async fn test_public_page_passes_through_unmodified() {
    let response = send(gated_app(MockIdentityBackend::anonymous()), "/products", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(body_text(response).await, "products");
}

#[tokio::test]
async fn test_rotated_cookies_survive_every_branch() {
    let cases = [
        (MockIdentityBackend::anonymous(), "/products", StatusCode::OK),
        (MockIdentityBackend::anonymous(), "/protected", StatusCode::TEMPORARY_REDIRECT),
        (signed_in(), "/auth/login", StatusCode::TEMPORARY_REDIRECT),
        (signed_in(), "/protected", StatusCode::OK),
        (MockIdentityBackend::failing(), "/protected", StatusCode::TEMPORARY_REDIRECT),
    ];

    for (backend, path, status) in cases {
        let backend = backend
            .with_rotated_cookie("sb-x-auth-token.0", "part-one")
            .with_rotated_cookie("sb-x-auth-token.1", "part-two");
        let response = send(gated_app(backend), path, Some("sb-x-auth-token=old")).await;

        assert_eq!(response.status(), status, "{path}");
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2, "{path}: {cookies:?}");
        assert!(cookies[0].starts_with("sb-x-auth-token.0=part-one"));
        assert!(cookies[1].starts_with("sb-x-auth-token.1=part-two"));
    }
}

#[tokio::test]
async fn test_handlers_see_rotated_cookies_and_session() {
    let backend = signed_in().with_rotated_cookie("sb-x-auth-token", "rotated");

    let response = send(gated_app(backend.clone()), "/echo-cookies", Some("theme=rose; sb-x-auth-token=old")).await;
    assert_eq!(body_text(response).await, "theme=rose; sb-x-auth-token=rotated");

    let response = send(gated_app(backend), "/whoami", None).await;
    assert_eq!(body_text(response).await, format!("true:Some({TEST_USER_ID})"));
}

#[tokio::test]
async fn test_request_cookie_header_untouched_without_rotation() {
    let response = send(
        gated_app(MockIdentityBackend::anonymous()),
        "/echo-cookies",
        Some("theme=rose;  cart=3"),
    )
    .await;

    assert_eq!(body_text(response).await, "theme=rose;  cart=3");
}

#[tokio::test]
async fn test_bypassed_assets_skip_identity_check() {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend = CountingBackend { calls: calls.clone() };
    let app = gated_app(backend);

    let response = send(app.clone(), "/static/logo.txt", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let response = send(app, "/products", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
