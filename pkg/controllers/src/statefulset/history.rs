//! Controller revision history: storage seam, ordering and pruning.

use anyhow::{Context, Result};
use async_trait::async_trait;
use pkg_constants::state::{CONTROLLER_REVISIONS_PREFIX, namespace_prefix, object_key};
use pkg_state::{StateStore, is_not_found};
use pkg_types::meta::selector_matches;
use pkg_types::pod::Pod;
use pkg_types::revision::ControllerRevision;
use pkg_types::statefulset::StatefulSet;
use std::collections::HashSet;
use tracing::{debug, info};

use super::utils::{get_pod_revision, is_owned_by_set, set_owner_ref};

/// Persistence for controller revisions.
#[async_trait]
pub trait ControllerHistory: Send + Sync {
    /// Every revision in the set's namespace whose labels match its selector,
    /// owned or not.
    async fn list(&self, set: &StatefulSet) -> Result<Vec<ControllerRevision>>;

    /// Persist a new revision. Fails with `StoreError::AlreadyExists` when the name is taken.
    async fn create(&self, revision: &ControllerRevision) -> Result<ControllerRevision>;

    /// Move an existing revision to a new revision number.
    async fn update(&self, revision: &ControllerRevision, new_revision: u64) -> Result<ControllerRevision>;

    /// Remove a revision. Removing one that is already gone succeeds.
    async fn delete(&self, revision: &ControllerRevision) -> Result<()>;

    /// Make `set` the owner of an orphaned revision.
    async fn adopt(&self, set: &StatefulSet, revision: &ControllerRevision) -> Result<ControllerRevision>;
}

/// Sort ascending by revision number, name breaking ties.
pub fn sort_revisions(revisions: &mut [ControllerRevision]) {
    revisions.sort_by(|a, b| {
        a.revision
            .cmp(&b.revision)
            .then_with(|| a.name.cmp(&b.name))
    });
}

pub fn is_owned_by(revision: &ControllerRevision, set: &StatefulSet) -> bool {
    is_owned_by_set(revision.owner_ref.as_ref(), set)
}

/// Delete the oldest revisions that no pod uses until at most
/// `revision_history_limit` of them remain.
///
/// `revisions` must be sorted oldest first. The current and update
/// revisions, and any revision a pod is labelled with, are never deleted.
/// Stops at the first failed delete; earlier deletes stay done.
pub async fn truncate_history(
    history: &dyn ControllerHistory,
    set: &StatefulSet,
    pods: &[Pod],
    revisions: &[ControllerRevision],
    current_revision: &str,
    update_revision: &str,
) -> Result<()> {
    let mut live: HashSet<&str> = HashSet::new();
    live.insert(current_revision);
    live.insert(update_revision);
    live.extend(pods.iter().map(get_pod_revision).filter(|r| !r.is_empty()));

    let historic: Vec<&ControllerRevision> = revisions
        .iter()
        .filter(|r| !live.contains(r.name.as_str()))
        .collect();
    let limit = set.spec.revision_history_limit as usize;
    if historic.len() <= limit {
        return Ok(());
    }

    let excess = historic.len() - limit;
    debug!(
        "StatefulSet {}/{}: pruning {} of {} historic revisions",
        set.namespace,
        set.name,
        excess,
        historic.len()
    );
    for revision in &historic[..excess] {
        history
            .delete(revision)
            .await
            .with_context(|| format!("deleting revision {}", revision.name))?;
        info!(
            "StatefulSet {}/{}: deleted revision {} (#{})",
            set.namespace, set.name, revision.name, revision.revision
        );
    }
    Ok(())
}

// ─── StateStore-backed history ─────────────────────────────────

/// `ControllerHistory` over the `/registry/controllerrevisions/` keyspace.
#[derive(Clone)]
pub struct StoreHistory {
    store: StateStore,
}

impl StoreHistory {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    fn key(revision: &ControllerRevision) -> String {
        object_key(CONTROLLER_REVISIONS_PREFIX, &revision.namespace, &revision.name)
    }
}

#[async_trait]
impl ControllerHistory for StoreHistory {
    async fn list(&self, set: &StatefulSet) -> Result<Vec<ControllerRevision>> {
        let prefix = namespace_prefix(CONTROLLER_REVISIONS_PREFIX, &set.namespace);
        let entries = self
            .store
            .list_json::<ControllerRevision>(&prefix)
            .await
            .with_context(|| format!("listing revisions of StatefulSet {}/{}", set.namespace, set.name))?;
        Ok(entries
            .into_iter()
            .map(|(_, revision)| revision)
            .filter(|r| selector_matches(&set.spec.selector, &r.labels))
            .collect())
    }

    async fn create(&self, revision: &ControllerRevision) -> Result<ControllerRevision> {
        self.store.create_json(&Self::key(revision), revision).await?;
        Ok(revision.clone())
    }

    async fn update(&self, revision: &ControllerRevision, new_revision: u64) -> Result<ControllerRevision> {
        let key = Self::key(revision);
        let mut stored: ControllerRevision = self.store.must_get_json(&key).await?;
        if stored.revision == new_revision {
            return Ok(stored);
        }
        stored.revision = new_revision;
        self.store.put_json(&key, &stored).await?;
        Ok(stored)
    }

    async fn delete(&self, revision: &ControllerRevision) -> Result<()> {
        match self.store.delete(&Self::key(revision)).await {
            Err(e) if is_not_found(&e) => Ok(()),
            other => other,
        }
    }

    async fn adopt(&self, set: &StatefulSet, revision: &ControllerRevision) -> Result<ControllerRevision> {
        let key = Self::key(revision);
        let mut stored: ControllerRevision = self.store.must_get_json(&key).await?;
        if let Some(owner) = &stored.owner_ref {
            return Err(anyhow::anyhow!(
                "revision {} is already owned by {:?} {}",
                stored.name,
                owner.kind,
                owner.name
            ));
        }
        stored.owner_ref = Some(set_owner_ref(set));
        self.store.put_json(&key, &stored).await?;
        Ok(stored)
    }
}
