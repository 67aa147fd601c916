use crate::exec::{Host, RemoteExec, TIMEOUT_EXIT};
use crate::state::AppState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const STATUS_COMMAND: &str = "uname -n && uptime";

#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub reachable: bool,
    pub exit_code: Option<i32>,
    pub detail: String,
    pub latency_ms: u64,
    pub checked_at: String,
}

/// Latest reachability of every server, replaced as a whole.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostStatusSnapshot {
    pub updated_at: Option<String>,
    pub servers: BTreeMap<String, HostStatus>,
}

/// Probe every host, at most `max_concurrent` at a time, and wait for all.
pub async fn collect_statuses(
    remote: Arc<dyn RemoteExec>,
    hosts: &[Host],
    max_concurrent: usize,
    timeout: Duration,
) -> HostStatusSnapshot {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for host in hosts.iter().cloned() {
        let semaphore = semaphore.clone();
        let remote = remote.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let started = Instant::now();
            let result = remote.run(&host, STATUS_COMMAND, timeout).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let status = match result {
                Ok(out) => HostStatus {
                    reachable: out.success(),
                    exit_code: Some(out.exit_code),
                    detail: if out.success() {
                        out.stdout.trim().to_string()
                    } else if out.exit_code == TIMEOUT_EXIT {
                        format!("timed out after {}s", timeout.as_secs())
                    } else {
                        out.stderr.trim().to_string()
                    },
                    latency_ms,
                    checked_at: chrono::Utc::now().to_rfc3339(),
                },
                Err(e) => HostStatus {
                    reachable: false,
                    exit_code: None,
                    detail: e.to_string(),
                    latency_ms,
                    checked_at: chrono::Utc::now().to_rfc3339(),
                },
            };
            (host.name, status)
        });
    }

    let mut servers = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, status)) => {
                servers.insert(name, status);
            }
            Err(e) => tracing::warn!("Host status task failed: {e}"),
        }
    }

    HostStatusSnapshot {
        updated_at: Some(chrono::Utc::now().to_rfc3339()),
        servers,
    }
}

pub fn start_status_service(state: Arc<AppState>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.fleet.poll_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let snapshot = collect_statuses(
                        state.remote.clone(),
                        &state.fleet.servers,
                        state.fleet.max_concurrent_hosts,
                        state.fleet.status_timeout(),
                    )
                    .await;

                    let reachable = snapshot.servers.values().filter(|s| s.reachable).count();
                    tracing::debug!(reachable, total = snapshot.servers.len(), "host status refreshed");

                    let payload = serde_json::to_value(&snapshot).unwrap_or_default();
                    *state.host_status.write().await = snapshot;
                    state.ui.broadcast("server:status", payload);
                }
            }
        }
        tracing::info!("Host status service stopped");
    });
}
