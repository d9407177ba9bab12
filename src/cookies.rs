use axum::{
    http::{HeaderMap, HeaderValue, header},
    response::Response,
};
use axum_extra::extract::cookie::Cookie;

/// SessionCookies
///
/// The per-request cookie jar handed to the identity backend. It holds the
/// inbound cookie set (in header order) and every cookie the backend asks to
/// write, so they can be attached to whichever response is finally returned.
///
/// Cookie contents are opaque here: nothing is validated or interpreted.
#[derive(Debug, Default, Clone)]
pub struct SessionCookies {
    current: Vec<Cookie<'static>>,
    staged: Vec<Cookie<'static>>,
}

impl SessionCookies {
    /// Parses every `Cookie` header of the inbound request. Malformed pairs
    /// are skipped rather than failing the request.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let current = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|raw| Cookie::split_parse(raw.to_owned()))
            .filter_map(Result::ok)
            .map(Cookie::into_owned)
            .collect();

        Self {
            current,
            staged: Vec::new(),
        }
    }

    /// The cookie set as the request currently sees it, including anything
    /// staged so far.
    pub fn read(&self) -> &[Cookie<'static>] {
        &self.current
    }

    pub fn get(&self, name: &str) -> Option<&Cookie<'static>> {
        self.current.iter().find(|c| c.name() == name)
    }

    /// Cookies waiting to be written to the response.
    pub fn staged(&self) -> &[Cookie<'static>] {
        &self.staged
    }

    /// stage
    ///
    /// Records cookies for the outbound response and mirrors them into the
    /// request view. A removal cookie (empty value or zero max-age) drops the
    /// name from the view. Re-staging a cookie with the same name, path and
    /// domain replaces the earlier entry; other scopes are kept side by side.
    pub fn stage<I>(&mut self, cookies: I)
    where
        I: IntoIterator<Item = Cookie<'static>>,
    {
        for cookie in cookies {
            let removal = is_removal(&cookie);

            match self.current.iter().position(|c| c.name() == cookie.name()) {
                Some(idx) if removal => {
                    self.current.remove(idx);
                }
                Some(idx) => {
                    self.current[idx] = Cookie::new(cookie.name().to_string(), cookie.value().to_string());
                }
                None if !removal => {
                    self.current
                        .push(Cookie::new(cookie.name().to_string(), cookie.value().to_string()));
                }
                None => {}
            }

            match self.staged.iter().position(|c| same_scope(c, &cookie)) {
                Some(idx) => self.staged[idx] = cookie,
                None => self.staged.push(cookie),
            }
        }
    }

    /// sync_request
    ///
    /// Rewrites the inbound `Cookie` header from the current view so handlers
    /// behind the gate see rotated tokens, not the stale ones the browser sent.
    pub fn sync_request(&self, headers: &mut HeaderMap) {
        if self.staged.is_empty() {
            return;
        }

        headers.remove(header::COOKIE);
        if self.current.is_empty() {
            return;
        }

        let joined = self
            .current
            .iter()
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect::<Vec<_>>()
            .join("; ");

        match HeaderValue::from_str(&joined) {
            Ok(value) => {
                headers.insert(header::COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "could not rebuild request cookie header"),
        }
    }

    /// commit
    ///
    /// Appends one `Set-Cookie` header per staged cookie. A cookie the inner
    /// response already sets for the same scope is left to the handler (a
    /// logout's removal must not be followed by a rotated token). A cookie
    /// that cannot be rendered as a header value is logged and skipped; the
    /// response is always returned.
    pub fn commit(self, mut response: Response) -> Response {
        let headers = response.headers_mut();
        let already_set: Vec<Cookie<'static>> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|raw| Cookie::parse(raw.to_owned()).ok())
            .collect();

        for cookie in self.staged {
            if already_set.iter().any(|set| same_scope(set, &cookie)) {
                tracing::debug!(cookie = %cookie.name(), "response already sets cookie, keeping handler's value");
                continue;
            }
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(header::SET_COOKIE, value);
                }
                Err(e) => {
                    tracing::warn!(cookie = %cookie.name(), error = %e, "dropping unrenderable cookie")
                }
            }
        }
        response
    }
}

/// Browsers key cookies on (name, path, domain).
fn same_scope(a: &Cookie<'_>, b: &Cookie<'_>) -> bool {
    a.name() == b.name() && a.path() == b.path() && a.domain() == b.domain()
}

fn is_removal(cookie: &Cookie<'_>) -> bool {
    cookie.value().is_empty() || cookie.max_age().is_some_and(|age| age.is_zero())
}
