//! Side effects on pods and their persistent volume claims.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use pkg_constants::state::{PODS_PREFIX, PVCS_PREFIX, namespace_prefix, object_key};
use pkg_state::{StateStore, is_already_exists, is_not_found};
use pkg_types::config::ReconcilerConfig;
use pkg_types::meta::{OwnerKind, OwnerReference};
use pkg_types::pod::Pod;
use pkg_types::statefulset::{ClaimRetentionPolicyType, StatefulSet};
use pkg_types::volume::{PVCPhase, PersistentVolumeClaim};
use tracing::{debug, info};

use super::utils::{
    claims_for_ordinal, get_ordinal, identity_matches, new_claim, pod_in_ordinal_range, set_owner_ref,
    storage_matches, update_identity, update_storage,
};

/// Operations the reconciler issues against pods and claims.
///
/// Every mutation must be idempotent: creating something that exists or
/// deleting something that is gone succeeds.
#[async_trait]
pub trait StatefulPodControl: Send + Sync {
    /// Create the pod's missing claims, then the pod.
    async fn create(&self, set: &StatefulSet, pod: &Pod) -> Result<()>;

    async fn delete(&self, set: &StatefulSet, pod: &Pod) -> Result<()>;

    /// Persist identity, storage and label changes to an existing pod.
    async fn update(&self, set: &StatefulSet, pod: &Pod) -> Result<()>;

    /// True when one of the pod's claims belongs to a previous pod at the same ordinal.
    async fn claim_is_stale(&self, set: &StatefulSet, pod: &Pod) -> Result<bool>;

    async fn claims_match_retention_policy(&self, set: &StatefulSet, pod: &Pod) -> Result<bool>;

    async fn update_claim_for_retention_policy(&self, set: &StatefulSet, pod: &Pod) -> Result<()>;

    async fn create_missing_claims(&self, set: &StatefulSet, pod: &Pod) -> Result<()>;

    /// Push the set's claim templates onto the pod's claims. With `dry_run`
    /// only validates that every change is allowed.
    async fn apply_claims(&self, set: &StatefulSet, pod: &Pod, dry_run: bool) -> Result<()>;

    /// True once every claim exists, is bound and has the requested capacity.
    async fn ready_for_update(&self, set: &StatefulSet, pod: &Pod) -> Result<bool>;
}

// ─── Claim ownership ───────────────────────────────────────────

fn pod_owner_ref(pod: &Pod) -> OwnerReference {
    OwnerReference::new(OwnerKind::Pod, &pod.name, &pod.id)
}

fn is_ref_to(owner: &OwnerReference, kind: OwnerKind, name: &str) -> bool {
    owner.kind == kind && owner.name == name
}

/// Owner references `claim` should carry under the set's retention policy.
/// References to unrelated owners are preserved.
pub fn expected_claim_owners(set: &StatefulSet, pod: &Pod, claim: &PersistentVolumeClaim) -> Vec<OwnerReference> {
    let policy = &set.spec.persistent_volume_claim_retention_policy;
    let mut owners: Vec<OwnerReference> = claim
        .owner_refs
        .iter()
        .filter(|o| !is_ref_to(o, OwnerKind::StatefulSet, &set.name) && !is_ref_to(o, OwnerKind::Pod, &pod.name))
        .cloned()
        .collect();
    if policy.when_deleted == ClaimRetentionPolicyType::Delete {
        owners.push(set_owner_ref(set));
    }
    if policy.when_scaled == ClaimRetentionPolicyType::Delete && !pod_in_ordinal_range(pod, set) {
        owners.push(pod_owner_ref(pod));
    }
    owners
}

pub fn claim_owners_match(set: &StatefulSet, pod: &Pod, claim: &PersistentVolumeClaim) -> bool {
    let mut want = expected_claim_owners(set, pod, claim);
    let mut have = claim.owner_refs.clone();
    let key = |o: &OwnerReference| (o.name.clone(), o.uid.clone());
    want.sort_by_key(key);
    have.sort_by_key(key);
    want == have
}

/// Owned by a pod that is not `pod`, or already on its way out.
pub fn claim_is_stale_for(pod: &Pod, claim: &PersistentVolumeClaim) -> bool {
    claim.deletion_timestamp.is_some()
        || claim
            .owner_refs
            .iter()
            .any(|o| o.kind == OwnerKind::Pod && o.uid != pod.id)
}

// ─── StateStore-backed pod control ─────────────────────────────

#[derive(Clone)]
pub struct StorePodControl {
    store: StateStore,
    config: ReconcilerConfig,
}

impl StorePodControl {
    pub fn new(store: StateStore, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    fn pod_key(pod: &Pod) -> String {
        object_key(PODS_PREFIX, &pod.namespace, &pod.name)
    }

    fn claim_key(namespace: &str, name: &str) -> String {
        object_key(PVCS_PREFIX, namespace, name)
    }

    /// The pod's claims by template, `None` where the claim does not exist yet.
    async fn claims(&self, set: &StatefulSet, pod: &Pod) -> Result<Vec<(String, Option<PersistentVolumeClaim>)>> {
        let Some(ordinal) = get_ordinal(pod) else {
            bail!("pod {} has no ordinal", pod.name);
        };
        let mut claims = Vec::new();
        for (_, name) in claims_for_ordinal(set, ordinal) {
            let claim = self
                .store
                .get_json::<PersistentVolumeClaim>(&Self::claim_key(&set.namespace, &name))
                .await?;
            claims.push((name, claim));
        }
        Ok(claims)
    }

    async fn delete_claims_owned_by(&self, pod: &Pod) -> Result<()> {
        let prefix = namespace_prefix(PVCS_PREFIX, &pod.namespace);
        for (key, claim) in self.store.list_json::<PersistentVolumeClaim>(&prefix).await? {
            if !claim.owner_refs.iter().any(|o| o.kind == OwnerKind::Pod && o.uid == pod.id) {
                continue;
            }
            match self.store.delete(&key).await {
                Ok(()) => info!("deleted claim {} owned by pod {}", claim.name, pod.name),
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StatefulPodControl for StorePodControl {
    async fn create(&self, set: &StatefulSet, pod: &Pod) -> Result<()> {
        self.create_missing_claims(set, pod).await?;
        match self.store.create_json(&Self::pod_key(pod), pod).await {
            Ok(()) => {
                info!("StatefulSet {}/{}: created pod {}", set.namespace, set.name, pod.name);
                Ok(())
            }
            Err(e) if is_already_exists(&e) => {
                debug!("pod {}/{} already exists", pod.namespace, pod.name);
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("creating pod {}", pod.name)),
        }
    }

    async fn delete(&self, set: &StatefulSet, pod: &Pod) -> Result<()> {
        match self.store.delete(&Self::pod_key(pod)).await {
            Ok(()) => info!("StatefulSet {}/{}: deleted pod {}", set.namespace, set.name, pod.name),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e).with_context(|| format!("deleting pod {}", pod.name)),
        }
        self.delete_claims_owned_by(pod).await
    }

    async fn update(&self, set: &StatefulSet, pod: &Pod) -> Result<()> {
        let key = Self::pod_key(pod);
        let mut stored: Pod = self
            .store
            .must_get_json(&key)
            .await
            .with_context(|| format!("updating pod {}", pod.name))?;

        let mut desired = pod.clone();
        if !identity_matches(set, &desired) {
            update_identity(set, &mut desired);
        }
        if !storage_matches(set, &desired) {
            update_storage(set, &mut desired);
            self.create_missing_claims(set, &desired).await?;
        }
        if self.config.auto_delete_pvc && !self.claims_match_retention_policy(set, &desired).await? {
            self.update_claim_for_retention_policy(set, &desired).await?;
        }

        stored.namespace = desired.namespace;
        stored.labels = desired.labels;
        stored.annotations = desired.annotations;
        stored.spec.volumes = desired.spec.volumes;
        self.store.put_json(&key, &stored).await?;
        debug!("StatefulSet {}/{}: updated pod {}", set.namespace, set.name, pod.name);
        Ok(())
    }

    async fn claim_is_stale(&self, set: &StatefulSet, pod: &Pod) -> Result<bool> {
        Ok(self
            .claims(set, pod)
            .await?
            .iter()
            .filter_map(|(_, claim)| claim.as_ref())
            .any(|claim| claim_is_stale_for(pod, claim)))
    }

    async fn claims_match_retention_policy(&self, set: &StatefulSet, pod: &Pod) -> Result<bool> {
        Ok(self
            .claims(set, pod)
            .await?
            .iter()
            .filter_map(|(_, claim)| claim.as_ref())
            .all(|claim| claim_owners_match(set, pod, claim)))
    }

    async fn update_claim_for_retention_policy(&self, set: &StatefulSet, pod: &Pod) -> Result<()> {
        for (_, claim) in self.claims(set, pod).await? {
            let Some(mut claim) = claim else { continue };
            if claim_owners_match(set, pod, &claim) {
                continue;
            }
            claim.owner_refs = expected_claim_owners(set, pod, &claim);
            self.store
                .put_json(&Self::claim_key(&claim.namespace, &claim.name), &claim)
                .await?;
            debug!("claim {}: owners set to {:?}", claim.name, claim.owner_refs);
        }
        Ok(())
    }

    async fn create_missing_claims(&self, set: &StatefulSet, pod: &Pod) -> Result<()> {
        let Some(ordinal) = get_ordinal(pod) else {
            bail!("pod {} has no ordinal", pod.name);
        };
        for (template, name) in claims_for_ordinal(set, ordinal) {
            let key = Self::claim_key(&set.namespace, &name);
            if self.store.get(&key).await?.is_some() {
                continue;
            }
            let mut claim = new_claim(set, template, &name);
            if self.config.auto_delete_pvc {
                claim.owner_refs = expected_claim_owners(set, pod, &claim);
            }
            match self.store.create_json(&key, &claim).await {
                Ok(()) => info!("StatefulSet {}/{}: created claim {}", set.namespace, set.name, name),
                Err(e) if is_already_exists(&e) => {}
                Err(e) => return Err(e).with_context(|| format!("creating claim {}", name)),
            }
        }
        Ok(())
    }

    async fn apply_claims(&self, set: &StatefulSet, pod: &Pod, dry_run: bool) -> Result<()> {
        let Some(ordinal) = get_ordinal(pod) else {
            bail!("pod {} has no ordinal", pod.name);
        };
        for (template, name) in claims_for_ordinal(set, ordinal) {
            let key = Self::claim_key(&set.namespace, &name);
            let Some(mut claim) = self.store.get_json::<PersistentVolumeClaim>(&key).await? else {
                if !dry_run {
                    self.create_missing_claims(set, pod).await?;
                }
                continue;
            };
            if template.requested_bytes < claim.requested_bytes {
                bail!(
                    "claim {} cannot shrink from {} to {} bytes",
                    name,
                    claim.requested_bytes,
                    template.requested_bytes
                );
            }
            if dry_run {
                continue;
            }
            claim.requested_bytes = template.requested_bytes;
            claim.access_modes = template.access_modes.clone();
            claim.labels.extend(template.labels.clone());
            self.store.put_json(&key, &claim).await?;
            debug!("StatefulSet {}/{}: applied template to claim {}", set.namespace, set.name, name);
        }
        Ok(())
    }

    async fn ready_for_update(&self, set: &StatefulSet, pod: &Pod) -> Result<bool> {
        let Some(ordinal) = get_ordinal(pod) else {
            return Ok(false);
        };
        for (template, name) in claims_for_ordinal(set, ordinal) {
            let claim = self
                .store
                .get_json::<PersistentVolumeClaim>(&Self::claim_key(&set.namespace, &name))
                .await?;
            let ready = claim.is_some_and(|c| {
                c.phase == PVCPhase::Bound && c.capacity_bytes >= template.requested_bytes
            });
            if !ready {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
