//! vl-proxy: the virtual library reverse proxy.
//!
//! This crate ties the other vl-* crates into a running server:
//!
//! - pass-through forwarding of every request to the upstream media server
//! - route-matched response rewriting that injects virtual libraries
//! - background cover harvesting with a durable idempotency store
//! - graceful shutdown via signal handling

pub mod context;
pub mod harvest;
pub mod middleware;
pub mod resolver;
pub mod rewrite;
pub mod routes;
pub mod transport;
pub mod upstream;

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tower_http::trace::TraceLayer;
use vl_core::{Config, Error, Result};
use vl_db::pool::{get_conn, init_pool, DbPool};
use vl_db::queries::harvests;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;

/// Build the application router: one fallback that forwards everything.
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .fallback(transport::forward)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serve `ctx` on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(ctx);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("Server error: {e}")))
}

/// Open the idempotency store and import any legacy completion log.
pub fn open_store(config: &Config) -> Result<DbPool> {
    let pool = init_pool(&config.harvest.store_path)?;
    tracing::info!("Harvest store opened at {}", config.harvest.store_path.display());

    if let Some(ref log) = config.harvest.legacy_done_log {
        let conn = get_conn(&pool)?;
        let imported = harvests::import_legacy_log(&conn, log)?;
        if imported > 0 {
            tracing::info!(imported, path = %log.display(), "Imported legacy harvest log");
        }
    }

    Ok(pool)
}

/// Start the proxy and run until a shutdown signal arrives.
pub async fn start(config: Config) -> Result<()> {
    let store = if config.harvest.enabled {
        Some(open_store(&config)?)
    } else {
        tracing::info!("Cover harvesting disabled");
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid server address: {e}")))?;

    tracing::info!(
        upstream = %config.upstream.base_url(),
        libraries = config.libraries.len(),
        "Starting virtlib proxy on {addr}"
    );
    for library in &config.libraries {
        tracing::debug!(
            library = %library.name,
            id = %vl_core::hash_name(&library.name),
            resource = ?library.resource.kind,
            "Virtual library"
        );
    }

    let ctx = AppContext::new(config, store)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    serve(listener, ctx, shutdown_signal()).await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
