//! HTTP boundary: routes, auth middleware and server startup.

mod error;
mod middleware;
mod routes;

pub use error::ApiError;
pub use routes::canned_advertisement;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::AppContext;

/// Build the gateway router over a shared context.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let secured = Router::new()
        .route("/advertisement", post(routes::advertisement))
        .route("/custom-prompt", post(routes::custom_prompt))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&ctx),
            middleware::require_bearer,
        ));

    Router::new()
        .merge(secured)
        .route("/advertisement-mock", post(routes::advertisement_mock))
        .route("/stats", get(routes::stats))
        .route("/health", get(routes::health))
        .route("/health/live", get(routes::live))
        .route("/health/ready", get(routes::ready))
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn serve(
    ctx: Arc<AppContext>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = build_router(ctx);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "alpaca gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Serve, then stop the engine however serving ended. A bind failure still
/// lets the engine exit through its quit sentinel.
pub async fn serve_and_stop(
    ctx: Arc<AppContext>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let served = serve(Arc::clone(&ctx), addr, shutdown).await;
    ctx.stop().await;
    served
}
