use crate::config::FleetConfig;
use crate::db::connection::DbPool;
use crate::exec::{LocalExec, RemoteExec, SshRunner};
use crate::services::host_status::HostStatusSnapshot;
use crate::sync::{PlanStore, SyncEngine};
use crate::ws::ui::UiBroadcaster;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct AppState {
    pub db: DbPool,
    pub fleet: FleetConfig,
    pub remote: Arc<dyn RemoteExec>,
    pub ssh: SshRunner,
    pub engine: SyncEngine,
    pub plans: PlanStore,
    pub ui: UiBroadcaster,
    pub host_status: RwLock<HostStatusSnapshot>,
}

impl AppState {
    pub fn new(
        db: DbPool,
        fleet: FleetConfig,
        remote: Arc<dyn RemoteExec>,
        local: Arc<dyn LocalExec>,
    ) -> Self {
        let engine = SyncEngine::new(remote.clone(), local, fleet.engine_settings());
        let ssh = SshRunner::new(fleet.sync.ssh_key_path.clone());
        Self {
            db,
            fleet,
            remote,
            ssh,
            engine,
            plans: PlanStore::new(),
            ui: UiBroadcaster::new(),
            host_status: RwLock::new(HostStatusSnapshot::default()),
        }
    }
}
