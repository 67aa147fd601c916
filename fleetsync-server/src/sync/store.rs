use super::types::Plan;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Built plans waiting to be executed, keyed by a 32-hex-char id.
///
/// Executing a plan removes it. Plans do not expire.
#[derive(Default)]
pub struct PlanStore {
    plans: Mutex<HashMap<String, Plan>>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, plan: Plan) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.plans.lock().await.insert(id.clone(), plan);
        id
    }

    pub async fn get(&self, id: &str) -> Option<Plan> {
        self.plans.lock().await.get(id).cloned()
    }

    /// Remove and return the plan.
    pub async fn take(&self, id: &str) -> Option<Plan> {
        self.plans.lock().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.plans.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::SyncMode;
    use chrono::Utc;

    fn plan() -> Plan {
        Plan {
            mode: SyncMode::AToB,
            source_host: "root@a".into(),
            target_host: "root@b".into(),
            source_server: "a".into(),
            target_server: "b".into(),
            source_port: 22,
            target_port: 22,
            roots: vec!["/srv".into()],
            excludes: vec![],
            allow_delete: false,
            created_at: Utc::now(),
            by_root: Default::default(),
            conflicts: vec![],
        }
    }

    #[tokio::test]
    async fn ids_are_32_hex_chars() {
        let store = PlanStore::new();
        let id = store.insert(plan()).await;
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn take_consumes_the_plan() {
        let store = PlanStore::new();
        let id = store.insert(plan()).await;

        assert!(store.get(&id).await.is_some());
        assert!(store.take(&id).await.is_some());
        assert!(store.take(&id).await.is_none());
        assert!(store.get(&id).await.is_none());
        assert_eq!(store.len().await, 0);
    }
}
