use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::net::Registration;
use crate::server::{LifecycleState, ServerSummary};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub servers: usize,
    pub listeners: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let orchestrator = state.orchestrator.load_full();
    let status = match orchestrator.as_deref().map(|o| o.state()) {
        Some(LifecycleState::Opened) => "running",
        Some(LifecycleState::Failed) => "failed",
        _ => "starting",
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        servers: orchestrator.as_deref().map_or(0, |o| o.len()),
        listeners: state.io.len(),
    })
}

pub async fn get_servers(State(state): State<AdminState>) -> Json<Vec<ServerSummary>> {
    let orchestrator = state.orchestrator.load_full();
    Json(orchestrator.as_deref().map(|o| o.server_list()).unwrap_or_default())
}

pub async fn get_server(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<ServerSummary>, StatusCode> {
    let orchestrator = state.orchestrator.load_full();
    orchestrator
        .as_deref()
        .and_then(|o| o.find_by_name(&name))
        .map(|server| Json(server.summary()))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Plain-text server list, one line per server.
pub async fn get_server_list(State(state): State<AdminState>) -> String {
    let orchestrator = state.orchestrator.load_full();
    orchestrator.as_deref().map(|o| o.show_server_list()).unwrap_or_default()
}

pub async fn get_listeners(State(state): State<AdminState>) -> Json<Vec<Registration>> {
    Json(state.io.registrations())
}
