use crate::error::AppError;
use crate::services::agent_installer::{install_agent, local_agent_binary, remote_install_path};
use crate::services::host_status::HostStatus;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_servers))
        .route("/{name}/install-agent", post(install))
}

#[derive(Debug, Serialize)]
pub struct ServerView {
    pub name: String,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub status: Option<HostStatus>,
}

async fn list_servers(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.host_status.read().await.clone();
    let servers: Vec<ServerView> = state
        .fleet
        .servers
        .iter()
        .map(|s| ServerView {
            name: s.name.clone(),
            ssh_host: s.ssh_host.clone(),
            ssh_port: s.ssh_port,
            status: snapshot.servers.get(&s.name).cloned(),
        })
        .collect();

    Json(json!({ "updated_at": snapshot.updated_at, "servers": servers }))
}

async fn install(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let host = state
        .fleet
        .server(&name)
        .cloned()
        .ok_or_else(|| AppError::NotFound("Server not found".into()))?;

    let agent_path = state.fleet.sync.agent_path.clone();
    let path = remote_install_path(&agent_path).to_string();
    let version = install_agent(state.ssh.clone(), host.clone(), agent_path, local_agent_binary())
        .await
        .map_err(|e| AppError::BadGateway(format!("{}: {e:#}", host.name)))?;

    state.ui.broadcast(
        "server:agent-installed",
        json!({ "server": host.name, "version": version }),
    );
    Ok(Json(json!({ "server": host.name, "path": path, "version": version })))
}
