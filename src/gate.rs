use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{
    auth::{IdentityBackend, IdentityError, IdentityState},
    config::GateConfig,
    cookies::SessionCookies,
    models::Session,
};

/// PathClass
///
/// The path groups the gate distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// Requires a present session (the account/profile area).
    Protected,
    /// Login and sign-up: only meaningful to anonymous visitors.
    AuthPage,
    /// Everything else, including the OAuth callback.
    Public,
}

/// AccessDecision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    RedirectToLogin,
    RedirectToLanding,
}

impl AccessDecision {
    /// decide
    ///
    /// The whole access policy. Pure: same inputs, same answer.
    pub fn decide(session_present: bool, class: PathClass) -> Self {
        match (session_present, class) {
            (false, PathClass::Protected) => Self::RedirectToLogin,
            (true, PathClass::AuthPage) => Self::RedirectToLanding,
            (_, PathClass::Public) | (true, PathClass::Protected) | (false, PathClass::AuthPage) => {
                Self::Allow
            }
        }
    }
}

/// PathClassifier
///
/// Maps a request path to its `PathClass` using the configured prefix lists.
/// Protected prefixes are checked before auth-page prefixes, so a path
/// matching both is `Protected`.
#[derive(Debug, Clone)]
pub struct PathClassifier {
    protected_prefixes: Vec<String>,
    auth_page_prefixes: Vec<String>,
    bypass_prefixes: Vec<String>,
    bypass_extensions: Vec<String>,
}

impl PathClassifier {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            protected_prefixes: config.protected_prefixes.clone(),
            auth_page_prefixes: config.auth_page_prefixes.clone(),
            bypass_prefixes: config.bypass_prefixes.clone(),
            bypass_extensions: config.bypass_extensions.clone(),
        }
    }

    pub fn classify(&self, path: &str) -> PathClass {
        if self.protected_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            PathClass::Protected
        } else if self.auth_page_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            PathClass::AuthPage
        } else {
            PathClass::Public
        }
    }

    /// True for static assets, which skip the gate entirely. Extensions match
    /// case-sensitively, so `invoice.PNG` still goes through the gate.
    pub fn bypasses(&self, path: &str) -> bool {
        if self.bypass_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return true;
        }

        let file = path.rsplit('/').next().unwrap_or(path);
        file.rsplit_once('.')
            .is_some_and(|(_, ext)| self.bypass_extensions.iter().any(|e| e == ext))
    }
}

/// GateState
///
/// Everything the gate needs, shared immutably across requests.
#[derive(Clone)]
pub struct GateState {
    pub identity: IdentityState,
    pub classifier: Arc<PathClassifier>,
    login_path: Arc<str>,
    landing_path: Arc<str>,
}

impl GateState {
    pub fn new(identity: IdentityState, config: &GateConfig) -> Self {
        Self {
            identity,
            classifier: Arc::new(PathClassifier::new(config)),
            login_path: Arc::from(config.login_path.as_str()),
            landing_path: Arc::from(config.landing_path.as_str()),
        }
    }

    /// Where a decision sends the caller, if anywhere. The query string is
    /// carried over; only the path changes.
    pub fn redirect_target(&self, decision: AccessDecision, query: Option<&str>) -> Option<String> {
        let path = match decision {
            AccessDecision::Allow => return None,
            AccessDecision::RedirectToLogin => &self.login_path,
            AccessDecision::RedirectToLanding => &self.landing_path,
        };

        Some(match query {
            Some(q) if !q.is_empty() => format!("{path}?{q}"),
            _ => path.to_string(),
        })
    }
}

/// refresh_session
///
/// Asks the identity backend who the caller is. Any failure, including an
/// absent session, is folded into an anonymous session: the gate fails
/// closed and never surfaces backend detail.
pub async fn refresh_session(identity: &dyn IdentityBackend, cookies: &mut SessionCookies) -> Session {
    match identity.current_user(cookies).await {
        Ok(user) => Session::from(user),
        Err(IdentityError::NoSession) => Session::anonymous(),
        Err(e) => {
            tracing::warn!(error = %e, "identity check failed, treating request as anonymous");
            Session::anonymous()
        }
    }
}

/// access_gate
///
/// Middleware run ahead of every page request. Refreshes the session from
/// cookies, classifies the path, then either lets the request through or
/// redirects it. Cookies staged by the identity backend are attached to the
/// response on every branch; dropping them would sign the user out.
pub async fn access_gate(State(gate): State<GateState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    if gate.classifier.bypasses(&path) {
        return next.run(request).await;
    }

    let mut cookies = SessionCookies::from_headers(request.headers());
    let session = refresh_session(gate.identity.as_ref(), &mut cookies).await;

    let class = gate.classifier.classify(&path);
    let decision = AccessDecision::decide(session.present, class);
    tracing::debug!(%path, ?class, ?decision, session = session.present, "access gate");

    let response = match gate.redirect_target(decision, request.uri().query()) {
        Some(target) => Redirect::temporary(&target).into_response(),
        None => {
            cookies.sync_request(request.headers_mut());
            request.extensions_mut().insert(session);
            next.run(request).await
        }
    };

    cookies.commit(response)
}
