//! Fleet directory synchronization.
//!
//! A sync is two separate calls. [`SyncEngine::build_plan`] snapshots both
//! hosts and computes the changes and conflicts for every root. The stored
//! [`Plan`] is later handed to [`SyncEngine::execute`] together with the
//! operator's conflict decisions, which resolves conflicts on the destination
//! and runs a staged rsync per root and direction.

pub mod collector;
pub mod conflict;
pub mod diff;
pub mod error;
pub mod executor;
pub mod itemize;
pub mod planner;
pub mod resolver;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod testing;

use crate::exec::{LocalExec, RemoteExec};
use collector::ManifestCollector;
use executor::{StagedExecutor, TransferSpec};
use resolver::{resolve_leg, AgentFs, Decisions, RemoteFs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use error::SyncError;
pub use planner::PlanRequest;
pub use store::PlanStore;
pub use types::{ConflictResolution, ExecutionResult, LegResult, Plan, Stage, SyncMode};

/// Tools and limits the engine runs with.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub agent_path: String,
    pub rsync_path: String,
    pub ssh_key_path: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub manifest_timeout: Duration,
    pub resolve_timeout: Duration,
    pub transfer_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            agent_path: "fleetsync-agent".into(),
            rsync_path: "rsync".into(),
            ssh_key_path: None,
            staging_dir: None,
            manifest_timeout: Duration::from_secs(240),
            resolve_timeout: Duration::from_secs(60),
            transfer_timeout: Duration::from_secs(3600),
        }
    }
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteExec>,
    local: Arc<dyn LocalExec>,
    fs: Arc<dyn RemoteFs>,
    settings: EngineSettings,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteExec>, local: Arc<dyn LocalExec>, settings: EngineSettings) -> Self {
        let fs = Arc::new(AgentFs::new(
            remote.clone(),
            settings.agent_path.clone(),
            settings.resolve_timeout,
        ));
        Self {
            remote,
            local,
            fs,
            settings,
        }
    }

    pub async fn build_plan(&self, request: PlanRequest) -> Result<Plan, SyncError> {
        let collector = ManifestCollector::new(
            self.remote.as_ref(),
            &self.settings.agent_path,
            self.settings.manifest_timeout,
        );
        planner::build_plan(&collector, request).await
    }

    /// Run every leg of `plan`: directions in mode order, roots in plan
    /// order. A failed leg does not stop the others. `on_leg` sees each leg
    /// as soon as it finishes.
    pub async fn execute<F>(
        &self,
        plan: &Plan,
        resolutions: &[ConflictResolution],
        mut on_leg: F,
    ) -> ExecutionResult
    where
        F: FnMut(&LegResult) + Send,
    {
        let decisions = Decisions::new(&plan.conflicts, resolutions);
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        let executor = StagedExecutor::new(
            self.local.as_ref(),
            &self.settings.rsync_path,
            self.settings.ssh_key_path.as_deref(),
            self.settings.staging_dir.as_deref(),
            self.settings.transfer_timeout,
        );

        let mut operations = Vec::new();
        for &direction in plan.mode.directions() {
            let (origin, destination) = plan.endpoints(direction);

            for root in &plan.roots {
                let mut leg = LegResult {
                    direction,
                    root: root.clone(),
                    ok: false,
                    stage: None,
                    error: None,
                    resolutions: Vec::new(),
                    pull: None,
                    push: None,
                };

                match resolve_leg(self.fs.as_ref(), plan, direction, root, &decisions, &stamp).await {
                    Err(failure) => {
                        leg.resolutions = failure.applied;
                        leg.stage = Some(Stage::Resolve);
                        leg.error = Some(failure.error.to_string());
                    }
                    Ok(resolution) => {
                        let job = TransferSpec {
                            origin: &origin,
                            destination: &destination,
                            root,
                            excludes: &plan.excludes,
                            skip: &resolution.skip,
                            allow_delete: plan.allow_delete,
                        };
                        let transfer = executor.transfer(&job).await;
                        leg.resolutions = resolution.applied;
                        leg.pull = transfer.pull;
                        leg.push = transfer.push;
                        match transfer.failure {
                            Some((stage, message)) => {
                                leg.stage = Some(stage);
                                leg.error = Some(message);
                            }
                            None => leg.ok = true,
                        }
                    }
                }

                on_leg(&leg);
                operations.push(leg);
            }
        }

        let ok = operations.iter().all(|leg| leg.ok);
        tracing::info!(
            mode = plan.mode.as_str(),
            legs = operations.len(),
            ok,
            "execution finished"
        );
        ExecutionResult { ok, operations }
    }
}
