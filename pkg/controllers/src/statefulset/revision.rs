//! Revision resolution: snapshot the desired templates, detect rollbacks and
//! name collisions, and rebuild the sets each revision describes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use pkg_constants::controller::REVISION_HASH_LEN;
use pkg_state::is_already_exists;
use pkg_types::config::ReconcilerConfig;
use pkg_types::pod::PodTemplate;
use pkg_types::revision::{ControllerRevision, RevisionData};
use pkg_types::statefulset::{PodManagementPolicy, StatefulSet};
use pkg_types::volume::PersistentVolumeClaimTemplate;
use serde_json::value::to_raw_value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::errors::RevisionError;
use super::history::ControllerHistory;
use super::utils::set_owner_ref;

/// Everything one reconcile pass needs to know about revisions.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub current_revision: String,
    pub update_revision: String,
    pub collision_count: u32,
    /// Ordered creation and termination; false means burst.
    pub monotonic: bool,
    /// Revisions whose pod template is byte-identical to the update revision's.
    /// Pods on these only need relabelling, not recreation.
    pub template_matches: HashSet<String>,
    pub current_set: StatefulSet,
    pub update_set: StatefulSet,
    /// Clock used for availability checks during this pass.
    pub now: DateTime<Utc>,
}

fn revision_data(set: &StatefulSet) -> Result<RevisionData> {
    Ok(RevisionData {
        template: to_raw_value(&set.spec.template)?,
        volume_claim_templates: to_raw_value(&set.spec.volume_claim_templates)?,
    })
}

/// `"{set}-{hash}"` where the hash covers the payload and the collision count.
pub fn revision_name(set_name: &str, data: &RevisionData, collision_count: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.template_bytes());
    hasher.update(data.claim_bytes());
    hasher.update(collision_count.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", set_name, &digest[..REVISION_HASH_LEN])
}

/// Snapshot the set's pod and claim templates as revision `revision`.
pub fn new_revision(set: &StatefulSet, revision: u64, collision_count: u32) -> Result<ControllerRevision> {
    let data = revision_data(set)?;
    Ok(ControllerRevision {
        id: Uuid::new_v4().to_string(),
        name: revision_name(&set.name, &data, collision_count),
        namespace: set.namespace.clone(),
        labels: set.spec.template.labels.clone(),
        owner_ref: Some(set_owner_ref(set)),
        data,
        revision,
        created_at: Utc::now(),
    })
}

/// Rebuild `set` with the templates stored in `revision`.
pub fn apply_revision(set: &StatefulSet, revision: &ControllerRevision) -> Result<StatefulSet, RevisionError> {
    let corrupt = |field: &'static str| {
        let name = revision.name.clone();
        move |source| RevisionError {
            revision: name,
            field,
            source,
        }
    };
    let template: PodTemplate =
        serde_json::from_str(revision.data.template.get()).map_err(corrupt("template"))?;
    let claims: Vec<PersistentVolumeClaimTemplate> =
        serde_json::from_str(revision.data.volume_claim_templates.get())
            .map_err(corrupt("volume_claim_templates"))?;

    let mut applied = set.clone();
    applied.spec.template = template;
    applied.spec.volume_claim_templates = claims;
    Ok(applied)
}

/// Number for the next revision given history sorted oldest first.
pub fn next_revision(revisions: &[ControllerRevision]) -> u64 {
    revisions.last().map_or(1, |r| r.revision + 1)
}

/// Revisions whose pod and claim templates both match `data` byte for byte.
pub fn find_equal_revisions<'a>(
    revisions: &'a [ControllerRevision],
    data: &RevisionData,
) -> Vec<&'a ControllerRevision> {
    revisions.iter().filter(|r| r.data.same_as(data)).collect()
}

pub fn is_monotonic(set: &StatefulSet, config: &ReconcilerConfig) -> bool {
    config
        .monotonic_override
        .unwrap_or(set.spec.pod_management_policy == PodManagementPolicy::OrderedReady)
}

/// Work out the current and update revisions for `set`, persisting a new
/// revision or rolling an old one forward when the templates changed.
///
/// `revisions` must be the set's owned history sorted oldest first. The
/// returned collision count must be written back with the status.
pub async fn resolve_revisions(
    history: &dyn ControllerHistory,
    set: &StatefulSet,
    revisions: &[ControllerRevision],
    config: &ReconcilerConfig,
) -> Result<ReconcileContext> {
    let mut collision_count = set.status.collision_count;
    let revision_no = next_revision(revisions);
    let mut candidate = new_revision(set, revision_no, collision_count)?;

    let equal = find_equal_revisions(revisions, &candidate.data);
    let latest = revisions.last();
    let update = match equal.last() {
        Some(eq) if latest.is_some_and(|l| l.name == eq.name) => (*eq).clone(),
        Some(eq) => {
            info!(
                "StatefulSet {}/{}: rolling back to revision {} (#{} -> #{})",
                set.namespace, set.name, eq.name, eq.revision, revision_no
            );
            history.update(eq, revision_no).await?
        }
        None => loop {
            match history.create(&candidate).await {
                Ok(created) => {
                    info!(
                        "StatefulSet {}/{}: created revision {} (#{})",
                        set.namespace, set.name, created.name, created.revision
                    );
                    break created;
                }
                Err(e) if is_already_exists(&e) => {
                    collision_count += 1;
                    warn!(
                        "StatefulSet {}/{}: revision name {} is taken, retrying with collision count {}",
                        set.namespace, set.name, candidate.name, collision_count
                    );
                    candidate = new_revision(set, revision_no, collision_count)?;
                }
                Err(e) => return Err(e),
            }
        },
    };

    let current = if set.status.current_revision == update.name {
        &update
    } else {
        revisions
            .iter()
            .find(|r| r.name == set.status.current_revision)
            .unwrap_or(&update)
    };

    let template_matches = revisions
        .iter()
        .chain(std::iter::once(&update))
        .filter(|r| r.data.template_bytes() == update.data.template_bytes())
        .map(|r| r.name.clone())
        .collect();

    Ok(ReconcileContext {
        current_revision: current.name.clone(),
        update_revision: update.name.clone(),
        collision_count,
        monotonic: is_monotonic(set, config),
        template_matches,
        current_set: apply_revision(set, current)?,
        update_set: apply_revision(set, &update)?,
        now: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statefulset::fake::{FakeHistory, HistoryCall, new_set};
    use pkg_types::volume::PersistentVolumeClaimTemplate;
    use serde_json::value::RawValue;

    fn with_image(set: &StatefulSet, image: &str) -> StatefulSet {
        let mut s = set.clone();
        s.spec.template.spec.containers[0].image = image.to_string();
        s
    }

    #[test]
    fn test_name_depends_on_payload_and_collisions() {
        let set = new_set("web", 3);
        let a = new_revision(&set, 1, 0).unwrap();
        let b = new_revision(&set, 7, 0).unwrap();
        assert_eq!(a.name, b.name);
        assert!(a.name.starts_with("web-"));
        assert_eq!(a.name.len(), "web-".len() + REVISION_HASH_LEN);

        assert_ne!(a.name, new_revision(&set, 1, 1).unwrap().name);
        assert_ne!(a.name, new_revision(&with_image(&set, "app:v2"), 1, 0).unwrap().name);
    }

    #[test]
    fn test_apply_round_trip() {
        let mut set = new_set("web", 3);
        set.spec.volume_claim_templates.push(PersistentVolumeClaimTemplate {
            name: "data".into(),
            requested_bytes: 1 << 30,
            ..Default::default()
        });
        let rev = new_revision(&set, 1, 0).unwrap();

        let mut base = with_image(&set, "app:other");
        base.spec.volume_claim_templates.clear();
        let applied = apply_revision(&base, &rev).unwrap();
        assert_eq!(applied.spec.template, set.spec.template);
        assert_eq!(applied.spec.volume_claim_templates, set.spec.volume_claim_templates);
        assert_eq!(new_revision(&applied, 1, 0).unwrap().name, rev.name);
    }

    #[test]
    fn test_next_revision() {
        let set = new_set("web", 1);
        assert_eq!(next_revision(&[]), 1);
        let mut rev = new_revision(&set, 4, 0).unwrap();
        assert_eq!(next_revision(std::slice::from_ref(&rev)), 5);
        rev.revision = 9;
        assert_eq!(next_revision(&[rev]), 10);
    }

    #[tokio::test]
    async fn test_first_resolve_creates_then_reuses() {
        let set = new_set("web", 2);
        let history = FakeHistory::default();
        let config = ReconcilerConfig::default();

        let ctx = resolve_revisions(&history, &set, &[], &config).await.unwrap();
        assert_eq!(history.calls().len(), 1);
        assert_eq!(ctx.current_revision, ctx.update_revision);
        assert!(ctx.monotonic);
        assert!(ctx.template_matches.contains(&ctx.update_revision));

        let stored = history.revisions();
        let again = resolve_revisions(&history, &set, &stored, &config).await.unwrap();
        assert_eq!(again.update_revision, ctx.update_revision);
        assert_eq!(history.calls().len(), 1, "identical templates must not create");
    }

    #[tokio::test]
    async fn test_changed_template_creates_next_revision() {
        let mut set = new_set("web", 2);
        let v1 = new_revision(&set, 1, 0).unwrap();
        let history = FakeHistory::with_revisions(vec![v1.clone()]);
        set.status.current_revision = v1.name.clone();

        let set = with_image(&set, "app:v2");
        let ctx = resolve_revisions(&history, &set, &[v1.clone()], &ReconcilerConfig::default())
            .await
            .unwrap();
        assert_eq!(ctx.current_revision, v1.name);
        assert_ne!(ctx.update_revision, v1.name);
        assert_eq!(history.calls(), vec![HistoryCall::Create(ctx.update_revision.clone())]);
        assert_eq!(ctx.current_set.spec.template.spec.containers[0].image, "app:v1");
        assert_eq!(ctx.update_set.spec.template.spec.containers[0].image, "app:v2");
        assert!(!ctx.template_matches.contains(&v1.name));
    }

    #[tokio::test]
    async fn test_rollback_bumps_existing_revision() {
        let set = new_set("web", 2);
        let v1 = new_revision(&set, 1, 0).unwrap();
        let v2 = new_revision(&with_image(&set, "app:v2"), 2, 0).unwrap();
        let history = FakeHistory::with_revisions(vec![v1.clone(), v2.clone()]);
        let mut set = set;
        set.status.current_revision = v2.name.clone();

        let ctx = resolve_revisions(&history, &set, &[v1.clone(), v2.clone()], &ReconcilerConfig::default())
            .await
            .unwrap();
        assert_eq!(ctx.update_revision, v1.name);
        assert_eq!(ctx.current_revision, v2.name);
        assert_eq!(history.calls(), vec![HistoryCall::Update(v1.name.clone(), 3)]);
        assert_eq!(history.revision(&v1.name).map(|r| r.revision), Some(3));
    }

    #[tokio::test]
    async fn test_name_collision_bumps_count() {
        let set = new_set("web", 1);
        // same name already taken by a revision this set does not own
        let mut foreign = new_revision(&with_image(&set, "other"), 1, 0).unwrap();
        foreign.name = new_revision(&set, 1, 0).unwrap().name;
        foreign.owner_ref = None;
        let history = FakeHistory::with_revisions(vec![foreign.clone()]);

        let ctx = resolve_revisions(&history, &set, &[], &ReconcilerConfig::default())
            .await
            .unwrap();
        assert_eq!(ctx.collision_count, 1);
        assert_eq!(ctx.update_revision, new_revision(&set, 1, 1).unwrap().name);
        assert_eq!(
            history.calls(),
            vec![
                HistoryCall::Create(foreign.name.clone()),
                HistoryCall::Create(ctx.update_revision.clone()),
            ]
        );
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_fatal() {
        let mut set = new_set("web", 1);
        let mut broken = new_revision(&with_image(&set, "app:v0"), 1, 0).unwrap();
        broken.data.template = RawValue::from_string(r#""not a template""#.to_string()).unwrap();
        set.status.current_revision = broken.name.clone();
        let history = FakeHistory::with_revisions(vec![broken.clone()]);

        let err = resolve_revisions(&history, &set, &[broken.clone()], &ReconcilerConfig::default())
            .await
            .unwrap_err();
        let corrupt = err.downcast_ref::<RevisionError>().expect("typed revision error");
        assert_eq!(corrupt.revision, broken.name);
        assert_eq!(corrupt.field, "template");
    }

    #[tokio::test]
    async fn test_template_matches_ignores_claims() {
        let set = new_set("web", 1);
        let mut with_claims = set.clone();
        with_claims.spec.volume_claim_templates.push(PersistentVolumeClaimTemplate {
            name: "data".into(),
            ..Default::default()
        });
        let old = new_revision(&set, 1, 0).unwrap();
        let history = FakeHistory::with_revisions(vec![old.clone()]);

        let ctx = resolve_revisions(&history, &with_claims, &[old.clone()], &ReconcilerConfig::default())
            .await
            .unwrap();
        assert_ne!(ctx.update_revision, old.name);
        assert!(ctx.template_matches.contains(&old.name));
    }

    #[test]
    fn test_monotonic_override() {
        let mut set = new_set("web", 1);
        let mut config = ReconcilerConfig::default();
        assert!(is_monotonic(&set, &config));
        set.spec.pod_management_policy = PodManagementPolicy::Parallel;
        assert!(!is_monotonic(&set, &config));
        config.monotonic_override = Some(true);
        assert!(is_monotonic(&set, &config));
    }
}
