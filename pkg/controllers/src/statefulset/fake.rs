//! In-memory collaborators that record every call, for reconciler tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use pkg_state::StoreError;
use pkg_types::config::ReconcilerConfig;
use pkg_types::pod::{ContainerSpec, Pod, PodSpec, PodStatus, PodTemplate};
use pkg_types::revision::ControllerRevision;
use pkg_types::statefulset::{StatefulSet, StatefulSetSpec, StatefulSetStatus};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use super::control::StatefulSetControl;
use super::history::{ControllerHistory, sort_revisions};
use super::pod_control::StatefulPodControl;
use super::revision::new_revision;
use super::status::StatusUpdater;
use super::utils::{new_stateful_pod, set_owner_ref, set_pod_revision};

pub fn new_set(name: &str, replicas: u32) -> StatefulSet {
    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    StatefulSet {
        id: format!("uid-{}", name),
        name: name.to_string(),
        namespace: "default".to_string(),
        spec: StatefulSetSpec {
            replicas,
            selector: labels.clone(),
            template: PodTemplate {
                labels,
                annotations: BTreeMap::new(),
                spec: PodSpec {
                    containers: vec![ContainerSpec {
                        name: "app".to_string(),
                        image: "app:v1".to_string(),
                        command: vec![],
                        args: vec![],
                        env: BTreeMap::new(),
                        resources: Default::default(),
                        volume_mounts: vec![],
                    }],
                    ..Default::default()
                },
            },
            volume_claim_templates: vec![],
            update_strategy: Default::default(),
            pod_management_policy: Default::default(),
            revision_history_limit: 10,
            min_ready_seconds: 0,
            ordinals_start: 0,
            persistent_volume_claim_retention_policy: Default::default(),
            volume_claim_update_policy: Default::default(),
        },
        status: StatefulSetStatus::default(),
        generation: 1,
        deletion_timestamp: None,
        created_at: Utc::now(),
    }
}

pub fn make_ready(pod: &mut Pod) {
    pod.status = PodStatus::Running;
    pod.ready_since = Some(Utc::now() - Duration::hours(1));
}

pub fn ready_pod(set: &StatefulSet, ordinal: u32, revision: &str) -> Pod {
    let mut pod = new_stateful_pod(set, ordinal);
    set_pod_revision(&mut pod, revision);
    make_ready(&mut pod);
    pod
}

pub fn revision_for(set: &StatefulSet, number: u64) -> ControllerRevision {
    new_revision(set, number, 0).unwrap()
}

// ─── Pod control ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodCall {
    Create(String),
    Delete(String),
    Update(String),
    CreateMissingClaims(String),
    UpdateClaimRetention(String),
    ApplyClaims(String, bool),
}

/// Records calls and keeps the resulting pods so a test can feed them into
/// the next pass.
#[derive(Default)]
pub struct FakePodControl {
    calls: Mutex<Vec<PodCall>>,
    pods: Mutex<BTreeMap<String, Pod>>,
    fail_create: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    stale: Mutex<HashSet<String>>,
    retention_mismatch: Mutex<HashSet<String>>,
    claims_pending: Mutex<HashSet<String>>,
}

impl FakePodControl {
    pub fn calls(&self) -> Vec<PodCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Pod-level mutations only, without claim bookkeeping.
    pub fn pod_calls(&self) -> Vec<PodCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, PodCall::Create(_) | PodCall::Delete(_) | PodCall::Update(_)))
            .collect()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.pods.lock().unwrap().values().cloned().collect()
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.pods.lock().unwrap().get(name).cloned()
    }

    pub fn insert(&self, pod: Pod) {
        self.pods.lock().unwrap().insert(pod.name.clone(), pod);
    }

    pub fn make_all_ready(&self) {
        for pod in self.pods.lock().unwrap().values_mut() {
            make_ready(pod);
        }
    }

    pub fn fail_create_of(&self, name: &str) {
        self.fail_create.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_delete_of(&self, name: &str) {
        self.fail_delete.lock().unwrap().insert(name.to_string());
    }

    pub fn mark_stale(&self, name: &str) {
        self.stale.lock().unwrap().insert(name.to_string());
    }

    pub fn mark_retention_mismatch(&self, name: &str) {
        self.retention_mismatch.lock().unwrap().insert(name.to_string());
    }

    pub fn hold_claims(&self, name: &str) {
        self.claims_pending.lock().unwrap().insert(name.to_string());
    }

    fn record(&self, call: PodCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl StatefulPodControl for FakePodControl {
    async fn create(&self, _set: &StatefulSet, pod: &Pod) -> Result<()> {
        self.record(PodCall::Create(pod.name.clone()));
        if self.fail_create.lock().unwrap().contains(&pod.name) {
            return Err(anyhow!("create {} refused", pod.name));
        }
        self.insert(pod.clone());
        Ok(())
    }

    async fn delete(&self, _set: &StatefulSet, pod: &Pod) -> Result<()> {
        self.record(PodCall::Delete(pod.name.clone()));
        if self.fail_delete.lock().unwrap().contains(&pod.name) {
            return Err(anyhow!("delete {} refused", pod.name));
        }
        self.pods.lock().unwrap().remove(&pod.name);
        Ok(())
    }

    async fn update(&self, _set: &StatefulSet, pod: &Pod) -> Result<()> {
        self.record(PodCall::Update(pod.name.clone()));
        self.insert(pod.clone());
        Ok(())
    }

    async fn claim_is_stale(&self, _set: &StatefulSet, pod: &Pod) -> Result<bool> {
        Ok(self.stale.lock().unwrap().contains(&pod.name))
    }

    async fn claims_match_retention_policy(&self, _set: &StatefulSet, pod: &Pod) -> Result<bool> {
        Ok(!self.retention_mismatch.lock().unwrap().contains(&pod.name))
    }

    async fn update_claim_for_retention_policy(&self, _set: &StatefulSet, pod: &Pod) -> Result<()> {
        self.record(PodCall::UpdateClaimRetention(pod.name.clone()));
        self.retention_mismatch.lock().unwrap().remove(&pod.name);
        Ok(())
    }

    async fn create_missing_claims(&self, _set: &StatefulSet, pod: &Pod) -> Result<()> {
        self.record(PodCall::CreateMissingClaims(pod.name.clone()));
        Ok(())
    }

    async fn apply_claims(&self, _set: &StatefulSet, pod: &Pod, dry_run: bool) -> Result<()> {
        self.record(PodCall::ApplyClaims(pod.name.clone(), dry_run));
        Ok(())
    }

    async fn ready_for_update(&self, _set: &StatefulSet, pod: &Pod) -> Result<bool> {
        Ok(!self.claims_pending.lock().unwrap().contains(&pod.name))
    }
}

// ─── History ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryCall {
    Create(String),
    Update(String, u64),
    Delete(String),
    Adopt(String),
}

#[derive(Default)]
pub struct FakeHistory {
    revisions: Mutex<BTreeMap<String, ControllerRevision>>,
    calls: Mutex<Vec<HistoryCall>>,
    fail_delete: Mutex<HashSet<String>>,
}

impl FakeHistory {
    pub fn with_revisions(revisions: Vec<ControllerRevision>) -> Self {
        let history = Self::default();
        {
            let mut stored = history.revisions.lock().unwrap();
            for r in revisions {
                stored.insert(r.name.clone(), r);
            }
        }
        history
    }

    pub fn calls(&self) -> Vec<HistoryCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Stored revisions, oldest first.
    pub fn revisions(&self) -> Vec<ControllerRevision> {
        let mut revisions: Vec<_> = self.revisions.lock().unwrap().values().cloned().collect();
        sort_revisions(&mut revisions);
        revisions
    }

    pub fn revision(&self, name: &str) -> Option<ControllerRevision> {
        self.revisions.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.revisions().into_iter().map(|r| r.name).collect()
    }

    pub fn fail_delete_of(&self, name: &str) {
        self.fail_delete.lock().unwrap().insert(name.to_string());
    }

    fn record(&self, call: HistoryCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ControllerHistory for FakeHistory {
    async fn list(&self, _set: &StatefulSet) -> Result<Vec<ControllerRevision>> {
        Ok(self.revisions.lock().unwrap().values().cloned().collect())
    }

    async fn create(&self, revision: &ControllerRevision) -> Result<ControllerRevision> {
        self.record(HistoryCall::Create(revision.name.clone()));
        let mut stored = self.revisions.lock().unwrap();
        if stored.contains_key(&revision.name) {
            return Err(StoreError::AlreadyExists(revision.name.clone()).into());
        }
        stored.insert(revision.name.clone(), revision.clone());
        Ok(revision.clone())
    }

    async fn update(&self, revision: &ControllerRevision, new_revision: u64) -> Result<ControllerRevision> {
        self.record(HistoryCall::Update(revision.name.clone(), new_revision));
        let mut stored = self.revisions.lock().unwrap();
        let existing = stored
            .get_mut(&revision.name)
            .ok_or_else(|| StoreError::NotFound(revision.name.clone()))?;
        existing.revision = new_revision;
        Ok(existing.clone())
    }

    async fn delete(&self, revision: &ControllerRevision) -> Result<()> {
        self.record(HistoryCall::Delete(revision.name.clone()));
        if self.fail_delete.lock().unwrap().contains(&revision.name) {
            return Err(anyhow!("delete {} refused", revision.name));
        }
        self.revisions.lock().unwrap().remove(&revision.name);
        Ok(())
    }

    async fn adopt(&self, set: &StatefulSet, revision: &ControllerRevision) -> Result<ControllerRevision> {
        self.record(HistoryCall::Adopt(revision.name.clone()));
        let mut stored = self.revisions.lock().unwrap();
        let existing = stored
            .get_mut(&revision.name)
            .ok_or_else(|| StoreError::NotFound(revision.name.clone()))?;
        existing.owner_ref = Some(set_owner_ref(set));
        Ok(existing.clone())
    }
}

// ─── Status ────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeStatusUpdater {
    writes: Mutex<Vec<StatefulSetStatus>>,
    fail: Mutex<bool>,
}

impl FakeStatusUpdater {
    pub fn writes(&self) -> Vec<StatefulSetStatus> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<StatefulSetStatus> {
        self.writes.lock().unwrap().last().cloned()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl StatusUpdater for FakeStatusUpdater {
    async fn update_status(&self, _set: &StatefulSet, status: &StatefulSetStatus) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("status write refused"));
        }
        self.writes.lock().unwrap().push(status.clone());
        Ok(())
    }
}

// ─── Harness ───────────────────────────────────────────────────

/// A reconciler wired to fakes, plus the fakes for assertions.
pub struct Harness {
    pub pods: Arc<FakePodControl>,
    pub status: Arc<FakeStatusUpdater>,
    pub history: Arc<FakeHistory>,
    pub control: StatefulSetControl,
}

impl Harness {
    pub fn new(config: ReconcilerConfig) -> Self {
        let pods = Arc::new(FakePodControl::default());
        let status = Arc::new(FakeStatusUpdater::default());
        let history = Arc::new(FakeHistory::default());
        let control = StatefulSetControl::new(pods.clone(), status.clone(), history.clone(), config);
        Self {
            pods,
            status,
            history,
            control,
        }
    }

    /// One reconcile pass over the pods the fake currently holds. Whatever
    /// status was written is copied back onto `set`, as the store would.
    pub async fn sync(&self, set: &mut StatefulSet) -> Result<StatefulSetStatus> {
        let pods = self.pods.pods();
        let result = self.control.update_stateful_set(set, &pods).await;
        if let Some(status) = self.status.last() {
            set.status = status;
        }
        result
    }
}
