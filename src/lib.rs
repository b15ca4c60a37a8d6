pub mod api;
pub mod auth;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod files;
pub mod models;
pub mod notify;
pub mod proxy;
pub mod storage;

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::cleanup::start_cleanup_tasks;
use crate::config::Config;
use crate::db::Database;
use crate::feed::ChangeFeed;
use crate::notify::Mailer;
use crate::storage::{FsBlobStore, SharedBlobStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub feed: ChangeFeed,
    pub blobs: SharedBlobStore,
    pub upload_config: files::UploadConfig,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(db: Database, config: Arc<Config>, blobs: SharedBlobStore) -> Self {
        Self {
            feed: ChangeFeed::new(config.feed.channel_capacity, config.feed.replay_buffer),
            upload_config: files::UploadConfig {
                max_file_size: config.uploads.max_file_size,
            },
            mailer: Mailer::new(config.email.clone()),
            db,
            config,
            blobs,
        }
    }
}

/// Run the server
pub async fn run(config: Config) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;

    tracing::info!(
        "Database pool: max={}, min={} connections",
        config.database.max_connections,
        config.database.min_connections
    );

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations completed successfully");

    let config = Arc::new(config);
    let db = Database::new(pool);

    let blobs: SharedBlobStore = Arc::new(FsBlobStore::new(&config.uploads.storage_dir).await?);
    tracing::info!("Blob storage directory: {}", config.uploads.storage_dir);

    start_cleanup_tasks(db.clone(), blobs.clone(), config.clone());
    tracing::info!(
        "Orphan sweep started (interval: {}s, grace: {}s)",
        config.uploads.cleanup_interval_secs,
        config.uploads.orphan_grace_secs
    );

    if !config.email.is_configured() {
        tracing::warn!("EMAIL_API_KEY not set - notification emails will not be sent");
    }

    let state = AppState::new(db, config.clone(), blobs);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("fanboard listening on {}", addr);
    tracing::info!("Max file size: {} bytes", config.uploads.max_file_size);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Build the full HTTP surface: REST API, change feed, file proxy and the
/// email function
pub fn router(state: AppState) -> Router {
    let config = state.config.clone();
    let cors = build_cors_layer(&config.security.cors_origins);

    let api = Router::new()
        .nest("/api/v1", api::router())
        .route("/api/v1/realtime", get(feed::stream_handler))
        .route("/functions/v1/send-email", post(notify::send_email_handler))
        .layer(cors);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(api)
        // The file proxy carries its own permissive CORS layer
        .merge(proxy::router())
        // Middleware layers (order matters - applied bottom to top)
        .layer(DefaultBodyLimit::max(config.uploads.max_file_size + 1024 * 100)) // File size + multipart overhead
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Readiness check - verifies database connectivity
async fn ready_check(State(state): State<AppState>) -> Result<&'static str, &'static str> {
    match sqlx::query("SELECT 1").execute(state.db.pool()).await {
        Ok(_) => Ok("ready"),
        Err(_) => Err("database unavailable"),
    }
}

/// Build CORS layer from configuration
fn build_cors_layer(origins: &str) -> CorsLayer {
    if origins == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        use tower_http::cors::AllowOrigin;

        let origins: Vec<_> = origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
