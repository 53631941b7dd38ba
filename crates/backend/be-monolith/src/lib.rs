use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::Router;
use axum::http::HeaderValue;
use be_auth_core::JwtConfig;
use be_payment_service::init_payment_service;
use be_ratelimit::{IngressGuard, RateLimitConfig, rate_limit_middleware};
use be_remote_db::{DatabaseManager, MemoryStore, SettlementStore};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173";

/// Configuration for running the monolith server.
pub struct ServerConfig {
    /// Required unless `local_mode` is set.
    pub database_url: Option<String>,
    pub http_addr: SocketAddr,
    /// Keeps all state in process; nothing survives a restart.
    pub local_mode: bool,
    /// When this receiver gets a value, the server shuts down gracefully.
    pub shutdown: tokio::sync::watch::Receiver<()>,
}

impl ServerConfig {
    pub fn from_env(shutdown: tokio::sync::watch::Receiver<()>) -> Result<Self> {
        let http_addr = std::env::var("HTTP_ADDR")
            .unwrap_or_else(|_| DEFAULT_HTTP_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("Invalid HTTP_ADDR format")?;

        Ok(Self {
            database_url: std::env::var("REMOTE_DATABASE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            http_addr,
            local_mode: std::env::var("RUNNING_FULLY_LOCAL")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            shutdown,
        })
    }
}

fn build_cors() -> CorsLayer {
    let allowed: Vec<HeaderValue> = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.into())
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<HeaderValue>().ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn open_store(config: &ServerConfig) -> Result<Arc<dyn SettlementStore>> {
    if config.local_mode {
        tracing::warn!("Local mode: using the in-process store, data is not persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow!("REMOTE_DATABASE_URL environment variable must be set"))?;
    let db = DatabaseManager::new(url)
        .await
        .context("Failed to connect to the database")?;
    Ok(Arc::new(db))
}

/// Health route plus `api`, all behind the Ingress Guard.
pub fn build_http_router(api: Router, guard: Arc<IngressGuard>) -> Router {
    let health_route = Router::new().route(
        "/health",
        axum::routing::get(|| async { axum::http::StatusCode::OK }),
    );

    api.merge(health_route)
        .layer(build_cors())
        .layer(axum::middleware::from_fn_with_state(
            guard,
            rate_limit_middleware,
        ))
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    if let Some(posthog_key) = std::env::var("POSTHOG_API_KEY")
        .ok()
        .filter(|s| !s.is_empty())
    {
        match posthog_rs::init_global(posthog_key.as_str()).await {
            Ok(()) => tracing::info!("PostHog analytics initialized"),
            Err(e) => tracing::warn!("Failed to initialize PostHog: {}", e),
        }
    } else {
        tracing::info!("POSTHOG_API_KEY not set, analytics disabled");
    }

    let jwt_config = JwtConfig::from_env()?;
    let store = open_store(&config).await?;

    let rate_limit_config = RateLimitConfig::from_env().context("Invalid rate limit settings")?;
    let guard = Arc::new(IngressGuard::connect(rate_limit_config, Some(jwt_config.clone())).await);
    tracing::info!(
        backend = guard.limiters().backend(),
        "Ingress guard ready"
    );

    let payment_router = init_payment_service(store, Arc::new(jwt_config))
        .context("Failed to initialize payment service")?;

    let http_router = build_http_router(payment_router, guard);

    tracing::info!("Starting HTTP server at {}", config.http_addr);

    let mut http_shutdown = config.shutdown.clone();
    let http_listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))?;

    axum::serve(
        http_listener,
        http_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = http_shutdown.changed().await;
        tracing::info!("Shutting down HTTP server...");
    })
    .await
    .inspect_err(|e| tracing::error!("HTTP server error: {}", e))?;

    Ok(())
}
