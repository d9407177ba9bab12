use std::env;

use thiserror::Error;

/// Path the identity provider redirects back to mid-handshake. It must stay
/// reachable without a session, so no protected prefix may cover it.
pub const AUTH_CALLBACK_PATH: &str = "/auth/callback";

/// ConfigError
///
/// Raised by `AppConfig::load` when a required variable is absent or a value
/// cannot be used. `main` treats any of these as fatal.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// AppConfig
///
/// Holds the application's entire configuration state. Immutable once loaded
/// and pulled into handlers and middleware via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls log format and secret requirements.
    pub env: Env,
    // Supabase project URL; the identity API lives under `/auth/v1`.
    pub supabase_url: String,
    // Publishable (anon) key sent as the `apikey` header.
    pub supabase_anon_key: String,
    // Socket address the HTTP server binds to.
    pub listen_addr: String,
    // Directory served under `/static`.
    pub static_dir: String,
    // Path-group rules for the access gate.
    pub gate: GateConfig,
}

/// Env
///
/// Defines the runtime context: local development against the Supabase CLI
/// stack, or production against a hosted project.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// GateConfig
///
/// The static path lists that drive the access gate. Changing them changes
/// gate behaviour; there is no runtime API for it.
#[derive(Clone, Debug, PartialEq)]
pub struct GateConfig {
    /// Prefixes that require a present session.
    pub protected_prefixes: Vec<String>,
    /// Prefixes only meaningful to anonymous visitors (login, sign-up).
    pub auth_page_prefixes: Vec<String>,
    /// Redirect target for anonymous visitors of protected paths.
    pub login_path: String,
    /// Redirect target for signed-in visitors of auth pages.
    pub landing_path: String,
    /// Prefixes that skip the gate entirely (static assets).
    pub bypass_prefixes: Vec<String>,
    /// File extensions that skip the gate entirely (images).
    pub bypass_extensions: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            protected_prefixes: vec!["/protected".to_string()],
            // The password-reset page is deliberately absent: signed-in users may reach it.
            auth_page_prefixes: vec!["/auth/login".to_string(), "/auth/sign-up".to_string()],
            login_path: "/auth/login".to_string(),
            landing_path: "/protected".to_string(),
            bypass_prefixes: ["/_next/static", "/_next/image", "/static/", "/favicon.ico"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            bypass_extensions: ["svg", "png", "jpg", "jpeg", "gif", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl GateConfig {
    /// validate
    ///
    /// Rejects rule sets that would break the auth flow: relative paths, a
    /// protected prefix covering the login page (redirect loop) or the OAuth
    /// callback (the handshake happens before a session exists).
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, path) in [
            ("GATE_LOGIN_PATH", &self.login_path),
            ("GATE_LANDING_PATH", &self.landing_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("`{path}` is not an absolute path"),
                });
            }
        }

        for prefix in &self.protected_prefixes {
            if !prefix.starts_with('/') {
                return Err(ConfigError::Invalid {
                    key: "GATE_PROTECTED_PREFIXES",
                    reason: format!("`{prefix}` is not an absolute path"),
                });
            }
            for reserved in [self.login_path.as_str(), AUTH_CALLBACK_PATH] {
                if reserved.starts_with(prefix.as_str()) {
                    return Err(ConfigError::Invalid {
                        key: "GATE_PROTECTED_PREFIXES",
                        reason: format!("`{prefix}` would protect `{reserved}`"),
                    });
                }
            }
        }

        if let Some(prefix) = self.auth_page_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid {
                key: "GATE_AUTH_PAGE_PREFIXES",
                reason: format!("`{prefix}` is not an absolute path"),
            });
        }

        // A signed-in caller on an auth page is sent to the landing page, so
        // landing there again would redirect forever.
        let landing = self.landing_path.as_str();
        let landing_protected = self.protected_prefixes.iter().any(|p| landing.starts_with(p.as_str()));
        if let Some(prefix) = self
            .auth_page_prefixes
            .iter()
            .find(|p| !landing_protected && landing.starts_with(p.as_str()))
        {
            return Err(ConfigError::Invalid {
                key: "GATE_LANDING_PATH",
                reason: format!("`{landing}` is an auth page (matches `{prefix}`)"),
            });
        }

        Ok(())
    }

    /// Applies the `GATE_*` environment overrides on top of the defaults.
    fn from_env() -> Result<Self, ConfigError> {
        let mut gate = Self::default();

        if let Some(list) = env_list("GATE_PROTECTED_PREFIXES") {
            gate.protected_prefixes = list;
        }
        if let Some(list) = env_list("GATE_AUTH_PAGE_PREFIXES") {
            gate.auth_page_prefixes = list;
        }
        if let Ok(path) = env::var("GATE_LOGIN_PATH") {
            gate.login_path = path.trim().to_string();
        }
        if let Ok(path) = env::var("GATE_LANDING_PATH") {
            gate.landing_path = path.trim().to_string();
        }

        gate.validate()?;
        Ok(gate)
    }
}

/// Reads a comma-separated list, dropping blanks. `None` when unset.
fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

impl Default for AppConfig {
    /// default
    ///
    /// A safe, non-panicking instance used for test setup, pointing at the
    /// local Supabase CLI stack.
    fn default() -> Self {
        Self {
            env: Env::Local,
            supabase_url: "http://127.0.0.1:54321".to_string(),
            supabase_anon_key: "local-anon-key".to_string(),
            listen_addr: "0.0.0.0:3000".to_string(),
            static_dir: "public".to_string(),
            gate: GateConfig::default(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads all parameters from environment variables. Production demands the
    /// Supabase credentials explicitly; local falls back to the CLI stack.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };
        let defaults = Self::default();

        let (supabase_url, supabase_anon_key) = match env {
            Env::Production => (
                env::var("SUPABASE_URL").map_err(|_| ConfigError::Missing("SUPABASE_URL"))?,
                env::var("SUPABASE_ANON_KEY")
                    .map_err(|_| ConfigError::Missing("SUPABASE_ANON_KEY"))?,
            ),
            Env::Local => (
                env::var("SUPABASE_URL").unwrap_or(defaults.supabase_url),
                env::var("SUPABASE_ANON_KEY").unwrap_or(defaults.supabase_anon_key),
            ),
        };

        if !supabase_url.starts_with("http://") && !supabase_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                key: "SUPABASE_URL",
                reason: format!("`{supabase_url}` is not an http(s) URL"),
            });
        }

        Ok(Self {
            env,
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
            listen_addr: env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            static_dir: env::var("STATIC_DIR").unwrap_or(defaults.static_dir),
            gate: GateConfig::from_env()?,
        })
    }
}
