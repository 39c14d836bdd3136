//! Stateful pod identity, storage wiring and health classification.

use chrono::{DateTime, Duration, Utc};
use pkg_constants::labels::{CONTROLLER_REVISION_HASH, POD_INDEX, STATEFULSET_POD_NAME};
use pkg_types::meta::{OwnerKind, OwnerReference, selector_matches};
use pkg_types::pod::{Pod, PodStatus};
use pkg_types::statefulset::{StatefulSet, StatefulSetUpdateStrategy};
use pkg_types::volume::{
    PVCPhase, PersistentVolumeClaim, PersistentVolumeClaimTemplate, Volume, VolumeSource,
};
use uuid::Uuid;

// ─── Identity ──────────────────────────────────────────────────

pub fn pod_name(set_name: &str, ordinal: u32) -> String {
    format!("{}-{}", set_name, ordinal)
}

/// Split `"{parent}-{ordinal}"`. Returns `None` when the suffix is not a plain number.
pub fn parse_ordinal(name: &str) -> Option<(&str, u32)> {
    let (parent, suffix) = name.rsplit_once('-')?;
    if parent.is_empty() || suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok().map(|ordinal| (parent, ordinal))
}

pub fn get_ordinal(pod: &Pod) -> Option<u32> {
    parse_ordinal(&pod.name).map(|(_, ordinal)| ordinal)
}

pub fn start_ordinal(set: &StatefulSet) -> u32 {
    set.spec.ordinals_start
}

/// One past the last ordinal of the replica window.
pub fn end_ordinal(set: &StatefulSet) -> u32 {
    set.spec.ordinals_start.saturating_add(set.spec.replicas)
}

pub fn pod_in_ordinal_range(pod: &Pod, set: &StatefulSet) -> bool {
    get_ordinal(pod).is_some_and(|o| o >= start_ordinal(set) && o < end_ordinal(set))
}

pub fn is_member_of(set: &StatefulSet, pod: &Pod) -> bool {
    parse_ordinal(&pod.name).is_some_and(|(parent, _)| parent == set.name)
}

pub fn set_owner_ref(set: &StatefulSet) -> OwnerReference {
    OwnerReference::new(OwnerKind::StatefulSet, &set.name, &set.id)
}

pub fn is_owned_by_set(owner: Option<&OwnerReference>, set: &StatefulSet) -> bool {
    owner.is_some_and(|o| o.kind == OwnerKind::StatefulSet && o.uid == set.id)
}

pub fn identity_matches(set: &StatefulSet, pod: &Pod) -> bool {
    let Some(ordinal) = get_ordinal(pod) else {
        return false;
    };
    is_member_of(set, pod)
        && pod.namespace == set.namespace
        && pod.labels.get(STATEFULSET_POD_NAME) == Some(&pod.name)
        && pod.labels.get(POD_INDEX) == Some(&ordinal.to_string())
}

pub fn update_identity(set: &StatefulSet, pod: &mut Pod) {
    pod.namespace = set.namespace.clone();
    pod.labels
        .insert(STATEFULSET_POD_NAME.to_string(), pod.name.clone());
    if let Some(ordinal) = get_ordinal(pod) {
        pod.labels.insert(POD_INDEX.to_string(), ordinal.to_string());
    }
}

// ─── Storage ───────────────────────────────────────────────────

pub fn claim_name(template: &str, set_name: &str, ordinal: u32) -> String {
    format!("{}-{}-{}", template, set_name, ordinal)
}

/// Claim names the pod at `ordinal` must mount, paired with their templates.
pub fn claims_for_ordinal(set: &StatefulSet, ordinal: u32) -> Vec<(&PersistentVolumeClaimTemplate, String)> {
    set.spec
        .volume_claim_templates
        .iter()
        .map(|t| (t, claim_name(&t.name, &set.name, ordinal)))
        .collect()
}

pub fn storage_matches(set: &StatefulSet, pod: &Pod) -> bool {
    let Some(ordinal) = get_ordinal(pod) else {
        return false;
    };
    claims_for_ordinal(set, ordinal).iter().all(|(template, claim)| {
        pod.spec.volumes.iter().any(|v| {
            v.name == template.name
                && matches!(&v.source, VolumeSource::PersistentVolumeClaim { claim_name } if claim_name == claim)
        })
    })
}

/// Point every claim-template volume at this ordinal's claim, keeping other volumes as they are.
pub fn update_storage(set: &StatefulSet, pod: &mut Pod) {
    let Some(ordinal) = get_ordinal(pod) else {
        return;
    };
    let templates = &set.spec.volume_claim_templates;
    if templates.is_empty() {
        return;
    }
    let mut volumes: Vec<Volume> = pod
        .spec
        .volumes
        .drain(..)
        .filter(|v| !templates.iter().any(|t| t.name == v.name))
        .collect();
    for (template, claim) in claims_for_ordinal(set, ordinal) {
        volumes.push(Volume {
            name: template.name.clone(),
            source: VolumeSource::PersistentVolumeClaim { claim_name: claim },
        });
    }
    pod.spec.volumes = volumes;
}

pub fn new_claim(set: &StatefulSet, template: &PersistentVolumeClaimTemplate, name: &str) -> PersistentVolumeClaim {
    let mut labels = template.labels.clone();
    labels.extend(set.spec.selector.clone());
    PersistentVolumeClaim {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        namespace: set.namespace.clone(),
        labels,
        storage_class: template.storage_class.clone(),
        access_modes: template.access_modes.clone(),
        requested_bytes: template.requested_bytes,
        capacity_bytes: 0,
        phase: PVCPhase::Pending,
        owner_refs: Vec::new(),
        deletion_timestamp: None,
        created_at: Utc::now(),
    }
}

// ─── Pod construction ──────────────────────────────────────────

pub fn new_stateful_pod(set: &StatefulSet, ordinal: u32) -> Pod {
    let template = &set.spec.template;
    let mut pod = Pod {
        id: Uuid::new_v4().to_string(),
        name: pod_name(&set.name, ordinal),
        namespace: set.namespace.clone(),
        spec: template.spec.clone(),
        status: PodStatus::Pending,
        status_message: None,
        node_name: None,
        labels: template.labels.clone(),
        annotations: template.annotations.clone(),
        owner_ref: Some(set_owner_ref(set)),
        ready_since: None,
        deletion_timestamp: None,
        restart_count: 0,
        created_at: Utc::now(),
    };
    update_identity(set, &mut pod);
    update_storage(set, &mut pod);
    pod
}

/// Build the pod for an empty slot from whichever revision the update strategy
/// assigns to `ordinal`: below the partition keeps the current revision.
pub fn new_versioned_stateful_pod(
    current_set: &StatefulSet,
    update_set: &StatefulSet,
    current_revision: &str,
    update_revision: &str,
    ordinal: u32,
) -> Pod {
    let keep_current = match &current_set.spec.update_strategy {
        StatefulSetUpdateStrategy::RollingUpdate { partition, .. } => {
            ordinal < start_ordinal(current_set).saturating_add(*partition)
        }
        StatefulSetUpdateStrategy::OnDelete => false,
    };
    let (set, revision) = if keep_current {
        (current_set, current_revision)
    } else {
        (update_set, update_revision)
    };
    let mut pod = new_stateful_pod(set, ordinal);
    set_pod_revision(&mut pod, revision);
    pod
}

pub fn get_pod_revision(pod: &Pod) -> &str {
    pod.labels
        .get(CONTROLLER_REVISION_HASH)
        .map(String::as_str)
        .unwrap_or_default()
}

pub fn set_pod_revision(pod: &mut Pod, revision: &str) {
    pod.labels
        .insert(CONTROLLER_REVISION_HASH.to_string(), revision.to_string());
}

pub fn selects_pod(set: &StatefulSet, pod: &Pod) -> bool {
    selector_matches(&set.spec.selector, &pod.labels)
}

// ─── Health ────────────────────────────────────────────────────

pub fn is_running_and_ready(pod: &Pod) -> bool {
    pod.status == PodStatus::Running && pod.ready_since.is_some()
}

/// Ready for at least `min_ready_seconds` as of `now`.
pub fn is_running_and_available(pod: &Pod, min_ready_seconds: u32, now: DateTime<Utc>) -> bool {
    if !is_running_and_ready(pod) {
        return false;
    }
    if min_ready_seconds == 0 {
        return true;
    }
    pod.ready_since
        .is_some_and(|since| since + Duration::seconds(i64::from(min_ready_seconds)) <= now)
}

pub fn is_terminating(pod: &Pod) -> bool {
    pod.deletion_timestamp.is_some()
}

pub fn is_failed(pod: &Pod) -> bool {
    pod.status == PodStatus::Failed
}

pub fn is_succeeded(pod: &Pod) -> bool {
    pod.status == PodStatus::Succeeded
}

pub fn is_pending(pod: &Pod) -> bool {
    matches!(
        pod.status,
        PodStatus::Pending | PodStatus::Scheduled | PodStatus::ContainerCreating
    )
}

pub fn is_healthy(pod: &Pod) -> bool {
    is_running_and_ready(pod) && !is_terminating(pod)
}
