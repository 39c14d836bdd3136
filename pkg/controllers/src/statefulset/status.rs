use anyhow::{Context, Result};
use async_trait::async_trait;
use pkg_constants::state::{STATEFULSETS_PREFIX, object_key};
use pkg_state::StateStore;
use pkg_types::statefulset::{StatefulSet, StatefulSetStatus, StatefulSetUpdateStrategy};
use tracing::debug;

/// Persists computed status back onto the StatefulSet.
#[async_trait]
pub trait StatusUpdater: Send + Sync {
    async fn update_status(&self, set: &StatefulSet, status: &StatefulSetStatus) -> Result<()>;
}

/// A rolling update is finished once every pod runs the update revision and is ready.
pub fn complete_rolling_update(set: &StatefulSet, status: &mut StatefulSetStatus) {
    if !matches!(set.spec.update_strategy, StatefulSetUpdateStrategy::RollingUpdate { .. }) {
        return;
    }
    if status.updated_replicas == status.replicas && status.ready_replicas == status.replicas {
        status.current_replicas = status.updated_replicas;
        status.current_revision = status.update_revision.clone();
    }
}

/// True when `status` differs from what is stored on `set`.
pub fn inconsistent_status(set: &StatefulSet, status: &StatefulSetStatus) -> bool {
    set.status != *status
}

#[derive(Clone)]
pub struct StoreStatusUpdater {
    store: StateStore,
}

impl StoreStatusUpdater {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatusUpdater for StoreStatusUpdater {
    async fn update_status(&self, set: &StatefulSet, status: &StatefulSetStatus) -> Result<()> {
        let key = object_key(STATEFULSETS_PREFIX, &set.namespace, &set.name);
        let mut stored: StatefulSet = self
            .store
            .must_get_json(&key)
            .await
            .with_context(|| format!("updating status of StatefulSet {}/{}", set.namespace, set.name))?;
        stored.status = status.clone();
        self.store.put_json(&key, &stored).await?;
        debug!(
            "StatefulSet {}/{}: status replicas={} ready={} updated={} current={}",
            set.namespace,
            set.name,
            status.replicas,
            status.ready_replicas,
            status.updated_replicas,
            status.current_revision
        );
        Ok(())
    }
}
