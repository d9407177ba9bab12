use crochet_storefront::{
    AppState,
    auth::{IdentityState, SupabaseAuth},
    config::{AppConfig, Env},
    create_router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initialises logging, wires the Supabase identity
/// backend and serves the router.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    // 2. Logging Filter Setup
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "crochet_storefront=debug,tower_http=info".into());

    // 3. Pretty output locally, JSON for log aggregation in production.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. Identity Backend
    let supabase = SupabaseAuth::new(&config.supabase_url, &config.supabase_anon_key);
    tracing::info!(
        supabase_url = %config.supabase_url,
        cookie = %supabase.cookie_name(),
        protected = ?config.gate.protected_prefixes,
        auth_pages = ?config.gate.auth_page_prefixes,
        "access gate configured"
    );
    let identity = Arc::new(supabase) as IdentityState;

    // 5. Router and Server Startup
    let listen_addr = config.listen_addr.clone();
    let app = create_router(AppState { identity, config });

    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %listen_addr, "FATAL: could not bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {listen_addr}");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server terminated");
        std::process::exit(1);
    }
}
