//! Read-only admin API.
//!
//! # Routes
//! - `GET /admin/status`: version and startup state
//! - `GET /admin/servers`: every virtual server as JSON
//! - `GET /admin/servers/{name}`: one server, 404 if unknown
//! - `GET /admin/server-list`: `show server list` text output
//! - `GET /admin/listeners`: sockets held by the scheduler
//!
//! The orchestrator is published through an `ArcSwapOption` once startup
//! finishes; until then the API answers with an empty server list.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::net::IoRegistry;
use crate::server::Orchestrator;

#[derive(Clone)]
pub struct AdminState {
    pub orchestrator: Arc<ArcSwapOption<Orchestrator>>,
    pub io: Arc<IoRegistry>,
    pub api_key: String,
}

impl AdminState {
    pub fn new(io: Arc<IoRegistry>, api_key: impl Into<String>) -> Self {
        Self {
            orchestrator: Arc::new(ArcSwapOption::empty()),
            io,
            api_key: api_key.into(),
        }
    }

    /// Make a started orchestrator visible to the API.
    pub fn publish(&self, orchestrator: Arc<Orchestrator>) {
        self.orchestrator.store(Some(orchestrator));
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/servers", get(get_servers))
        .route("/admin/servers/{name}", get(get_server))
        .route("/admin/server-list", get(get_server_list))
        .route("/admin/listeners", get(get_listeners))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    state: AdminState,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(address = ?addr, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
