//! HTTP surface: report ingress, the node read API and the notification
//! API.
//!
//! ## Endpoints
//!
//! - `POST /api/report` - status-report ingress
//! - `GET /api/nodes[/{id}[/history|/metrics|/services[/{name}]]]` - reads
//! - `GET /api/status` - system totals
//! - `POST|GET /api/notifications[...]` - notification lifecycle (API-key
//!   gated)
//! - `POST /api/notifications/callbacks/{type}/{id}` - ack ingress
//! - `POST /api/notifications/api-keys` - key management (admin)

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiState, SnapshotStore};

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the full router.
pub fn build_router(state: ApiState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/api/report", post(routes::ingest::report_status))
        .route("/api/nodes", get(routes::nodes::list_nodes))
        .route("/api/nodes/:id", get(routes::nodes::get_node))
        .route("/api/nodes/:id/history", get(routes::nodes::get_node_history))
        .route("/api/nodes/:id/metrics", get(routes::nodes::get_node_metrics))
        .route(
            "/api/nodes/:id/services",
            get(routes::nodes::list_node_services),
        )
        .route(
            "/api/nodes/:id/services/:name",
            get(routes::nodes::get_node_service),
        )
        .route("/api/status", get(routes::status::get_status))
        .route(
            "/api/notifications",
            post(routes::notifications::create_notification)
                .get(routes::notifications::list_notifications),
        )
        .route(
            "/api/notifications/api-keys",
            post(routes::notifications::create_api_key),
        )
        .route(
            "/api/notifications/api-keys/:key_id",
            delete(routes::notifications::revoke_api_key),
        )
        .route(
            "/api/notifications/callbacks/:target_type/:target_id",
            post(routes::notifications::callback),
        )
        .route(
            "/api/notifications/:id",
            get(routes::notifications::get_notification)
                .delete(routes::notifications::delete_notification),
        )
        .route(
            "/api/notifications/:id/acknowledge",
            post(routes::notifications::acknowledge_notification),
        )
        .route(
            "/api/notifications/:id/resolve",
            post(routes::notifications::resolve_notification),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(10)));

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Bind and serve the API in a background task. Returns the bound address.
/// The server drains in-flight requests and exits when the shutdown signal
/// flips.
pub async fn spawn_api_server(
    bind_addr: SocketAddr,
    state: ApiState,
    enable_cors: bool,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(state, enable_cors);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        });

        if let Err(e) = serve.await {
            error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
