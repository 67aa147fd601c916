//! Applies operator conflict decisions on the destination host.
//!
//! Nothing is ever deleted: the destination's version of a conflicting file
//! is either copied aside (and the path skipped) or moved aside (and the
//! incoming version written in its place). Backups live in the root's
//! conflict directory, which every stage excludes.

use super::error::{Result, SyncError};
use super::types::{
    AppliedResolution, Conflict, ConflictChoice, ConflictResolution, Direction, Plan,
    ResolutionAction,
};
use crate::exec::{shell_join, Host, RemoteExec, TIMEOUT_EXIT};
use async_trait::async_trait;
use fleetsync_agent::fs::exclude::CONFLICT_DIR;
use fleetsync_agent::fs::ops::Preserved;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// File operations on a fleet host. A missing source is not an error.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn copy(&self, host: &Host, from: &str, to: &str) -> Result<Preserved>;
    async fn rename(&self, host: &Host, from: &str, to: &str) -> Result<Preserved>;
}

/// [`RemoteFs`] backed by `fleetsync-agent fs` on the host.
pub struct AgentFs {
    remote: Arc<dyn RemoteExec>,
    agent_path: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct FsReply {
    result: Preserved,
}

impl AgentFs {
    pub fn new(remote: Arc<dyn RemoteExec>, agent_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            remote,
            agent_path: agent_path.into(),
            timeout,
        }
    }

    async fn run(&self, host: &Host, op: &str, from: &str, to: &str) -> Result<Preserved> {
        let command = shell_join(&[self.agent_path.as_str(), "fs", op, from, to]);
        let output = self.remote.run(host, &command, self.timeout).await?;

        if !output.success() {
            let stderr = if output.exit_code == TIMEOUT_EXIT {
                format!("fs {op} timed out after {}s", self.timeout.as_secs())
            } else {
                output.stderr.trim().to_string()
            };
            return Err(SyncError::RemoteCommand {
                host: host.name.clone(),
                root: from.to_string(),
                exit_code: output.exit_code,
                stderr,
            });
        }

        let reply: FsReply = serde_json::from_str(output.stdout.trim())
            .map_err(|e| SyncError::parse(format!("fs {op} on {}", host.name), e.to_string()))?;
        Ok(reply.result)
    }
}

#[async_trait]
impl RemoteFs for AgentFs {
    async fn copy(&self, host: &Host, from: &str, to: &str) -> Result<Preserved> {
        self.run(host, "copy", from, to).await
    }

    async fn rename(&self, host: &Host, from: &str, to: &str) -> Result<Preserved> {
        self.run(host, "move", from, to).await
    }
}

/// Valid decisions keyed by `(root, path)`, limited to planned conflicts.
#[derive(Debug, Default)]
pub struct Decisions(HashMap<(String, String), ConflictChoice>);

impl Decisions {
    pub fn new(conflicts: &[Conflict], resolutions: &[ConflictResolution]) -> Self {
        let mut map = HashMap::new();
        for resolution in resolutions {
            let known = conflicts
                .iter()
                .any(|c| c.root == resolution.root && c.path == resolution.path);
            match ConflictChoice::parse(&resolution.decision) {
                Some(choice) if known => {
                    map.insert((resolution.root.clone(), resolution.path.clone()), choice);
                }
                _ => tracing::debug!(
                    root = %resolution.root,
                    path = %resolution.path,
                    decision = %resolution.decision,
                    "ignoring conflict resolution"
                ),
            }
        }
        Self(map)
    }

    pub fn get(&self, root: &str, path: &str) -> Option<ConflictChoice> {
        self.0.get(&(root.to_string(), path.to_string())).copied()
    }
}

/// Outcome of the resolve step of one leg.
#[derive(Debug, Default)]
pub struct LegResolution {
    pub applied: Vec<AppliedResolution>,
    /// Paths the transfer must leave alone.
    pub skip: Vec<String>,
}

#[derive(Debug)]
pub struct ResolveFailure {
    pub applied: Vec<AppliedResolution>,
    pub error: SyncError,
}

/// Apply the decisions for `root` on the destination of `direction`.
///
/// `stamp` suffixes every backup name.
pub async fn resolve_leg(
    fs: &dyn RemoteFs,
    plan: &Plan,
    direction: Direction,
    root: &str,
    decisions: &Decisions,
    stamp: &str,
) -> std::result::Result<LegResolution, ResolveFailure> {
    let (_, destination) = plan.endpoints(direction);
    let mut out = LegResolution::default();

    for conflict in plan.conflicts.iter().filter(|c| c.root == root) {
        let Some(choice) = decisions.get(root, &conflict.path) else {
            continue;
        };

        let live = join_root(root, &conflict.path);
        let backup = join_root(root, &format!("{CONFLICT_DIR}/{}", conflict.path));

        let (action, to) = if choice == direction.keeps_destination() {
            (ResolutionAction::Backup, format!("{backup}.{stamp}.bak"))
        } else if choice == ConflictChoice::KeepBoth {
            let label = direction.destination_label();
            (ResolutionAction::Rename, format!("{backup}.{label}.conflict.{stamp}"))
        } else {
            continue;
        };

        let result = match action {
            ResolutionAction::Backup => fs.copy(&destination, &live, &to).await,
            ResolutionAction::Rename => fs.rename(&destination, &live, &to).await,
        };
        let result = match result {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(host = %destination.name, path = %live, error = %error, "conflict resolution failed");
                return Err(ResolveFailure {
                    applied: out.applied,
                    error,
                });
            }
        };

        tracing::info!(host = %destination.name, path = %live, to = %to, ?action, "conflict resolved");
        if action == ResolutionAction::Backup {
            out.skip.push(conflict.path.clone());
        }
        out.applied.push(AppliedResolution {
            path: conflict.path.clone(),
            decision: choice,
            action,
            host: destination.name.clone(),
            from: live,
            to,
            result,
        });
    }

    Ok(out)
}

fn join_root(root: &str, rel: &str) -> String {
    format!("{}/{rel}", root.trim_end_matches('/'))
}
