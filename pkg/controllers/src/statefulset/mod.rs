//! StatefulSet controller: ordered, identity-preserving replicas with
//! revision history.

pub mod batch;
pub mod control;
pub mod errors;
pub mod history;
pub mod pod_control;
pub mod revision;
pub mod status;
pub mod utils;

#[cfg(test)]
pub(crate) mod fake;

use anyhow::{Context, anyhow};
use pkg_constants::controller::{DEFAULT_SYNC_INTERVAL_SECS, DEFAULT_SYNC_TIMEOUT_SECS};
use pkg_constants::state::{NAMESPACES_PREFIX, PODS_PREFIX, STATEFULSETS_PREFIX, namespace_prefix};
use pkg_state::StateStore;
use pkg_types::config::ReconcilerConfig;
use pkg_types::pod::Pod;
use pkg_types::statefulset::{StatefulSet, StatefulSetStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use control::StatefulSetControl;
use history::{ControllerHistory, StoreHistory};
use pod_control::StorePodControl;
use status::StoreStatusUpdater;
use utils::{is_owned_by_set, selects_pod};

/// Controller that reconciles StatefulSets into ordinal-named Pods.
pub struct StatefulSetController {
    store: StateStore,
    control: StatefulSetControl,
    history: Arc<dyn ControllerHistory>,
    check_interval: Duration,
    sync_timeout: Duration,
}

impl StatefulSetController {
    pub fn new(store: StateStore, config: ReconcilerConfig) -> Self {
        let history: Arc<dyn ControllerHistory> = Arc::new(StoreHistory::new(store.clone()));
        let control = StatefulSetControl::new(
            Arc::new(StorePodControl::new(store.clone(), config)),
            Arc::new(StoreStatusUpdater::new(store.clone())),
            history.clone(),
            config,
        );
        Self {
            store,
            control,
            history,
            check_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
        }
    }

    pub fn with_intervals(mut self, check_interval: Duration, sync_timeout: Duration) -> Self {
        self.check_interval = check_interval;
        self.sync_timeout = sync_timeout;
        self
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "StatefulSetController started (interval={}s, timeout={}s)",
                self.check_interval.as_secs(),
                self.sync_timeout.as_secs()
            );
            let mut interval = tokio::time::interval(self.check_interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.reconcile().await {
                    warn!("StatefulSetController reconcile error: {:#}", e);
                }
            }
        })
    }

    async fn reconcile(&self) -> anyhow::Result<()> {
        let ns_entries = self.store.list_prefix(NAMESPACES_PREFIX).await?;
        for (ns_key, _) in ns_entries {
            let ns = ns_key.strip_prefix(NAMESPACES_PREFIX).unwrap_or_default();
            if ns.is_empty() {
                continue;
            }
            self.reconcile_namespace(ns).await?;
        }
        Ok(())
    }

    async fn reconcile_namespace(&self, ns: &str) -> anyhow::Result<()> {
        let entries = self
            .store
            .list_prefix(&namespace_prefix(STATEFULSETS_PREFIX, ns))
            .await?;
        for (key, value) in entries {
            let set: StatefulSet = match serde_json::from_slice(&value) {
                Ok(s) => s,
                Err(e) => {
                    warn!("skipping undecodable StatefulSet {}: {}", key, e);
                    continue;
                }
            };
            // one failing set must not starve the others; it is retried next tick
            if let Err(e) = self.sync(&set).await {
                warn!("StatefulSet {}/{}: sync failed: {:#}", ns, set.name, e);
            }
        }
        Ok(())
    }

    /// Run one reconcile pass for `set` under the sync timeout.
    pub async fn sync(&self, set: &StatefulSet) -> anyhow::Result<StatefulSetStatus> {
        let pods = self.pods_for(set).await?;
        self.adopt_orphan_revisions(set).await?;
        debug!("StatefulSet {}/{}: syncing with {} pods", set.namespace, set.name, pods.len());
        tokio::time::timeout(self.sync_timeout, self.control.update_stateful_set(set, &pods))
            .await
            .map_err(|_| anyhow!("sync timed out after {}s", self.sync_timeout.as_secs()))?
    }

    /// Pods owned by `set` that match its selector.
    async fn pods_for(&self, set: &StatefulSet) -> anyhow::Result<Vec<Pod>> {
        let entries = self
            .store
            .list_prefix(&namespace_prefix(PODS_PREFIX, &set.namespace))
            .await
            .with_context(|| format!("listing pods of StatefulSet {}/{}", set.namespace, set.name))?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, v)| match serde_json::from_slice::<Pod>(&v) {
                Ok(pod) => Some(pod),
                Err(e) => {
                    warn!("skipping undecodable pod {}: {}", key, e);
                    None
                }
            })
            .filter(|pod| is_owned_by_set(pod.owner_ref.as_ref(), set) && selects_pod(set, pod))
            .collect())
    }

    async fn adopt_orphan_revisions(&self, set: &StatefulSet) -> anyhow::Result<()> {
        for revision in self.history.list(set).await? {
            if revision.owner_ref.is_some() {
                continue;
            }
            self.history.adopt(set, &revision).await?;
            info!("StatefulSet {}/{}: adopted revision {}", set.namespace, set.name, revision.name);
        }
        Ok(())
    }
}
