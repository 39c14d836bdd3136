//! The StatefulSet reconciliation core.

use anyhow::Result;
use chrono::{DateTime, Utc};
use pkg_types::config::ReconcilerConfig;
use pkg_types::pod::Pod;
use pkg_types::revision::ControllerRevision;
use pkg_types::statefulset::{
    IntOrPercent, StatefulSet, StatefulSetStatus, StatefulSetUpdateStrategy, VolumeClaimUpdatePolicy,
};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::batch::run_for_all;
use super::errors::aggregate;
use super::history::{ControllerHistory, is_owned_by, sort_revisions, truncate_history};
use super::pod_control::StatefulPodControl;
use super::revision::{ReconcileContext, resolve_revisions};
use super::status::{StatusUpdater, complete_rolling_update, inconsistent_status};
use super::utils::{
    get_ordinal, get_pod_revision, identity_matches, is_failed, is_healthy, is_pending,
    is_running_and_available, is_running_and_ready, is_succeeded, is_terminating,
    new_versioned_stateful_pod, pod_in_ordinal_range, set_pod_revision, start_ordinal, storage_matches,
    update_identity, update_storage,
};

/// One slot of the replica window.
#[derive(Debug, Clone)]
pub enum Replica {
    /// A pod observed in the store.
    Live(Pod),
    /// A pod this pass would create for an empty slot.
    Planned(Pod),
}

impl Replica {
    pub fn pod(&self) -> &Pod {
        match self {
            Replica::Live(pod) | Replica::Planned(pod) => pod,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Replica::Live(_))
    }

    pub fn is_healthy(&self) -> bool {
        self.is_created() && is_healthy(self.pod())
    }

    /// Created, not terminating, and ready for at least `min_ready_seconds`.
    pub fn is_available(&self, min_ready_seconds: u32, now: DateTime<Utc>) -> bool {
        self.is_created()
            && !is_terminating(self.pod())
            && is_running_and_available(self.pod(), min_ready_seconds, now)
    }
}

/// Scale `max_unavailable` against the replica count. Absent means 1 and
/// anything that scales to 0 is raised to 1.
pub fn max_unavailable(value: Option<&IntOrPercent>, replicas: u32) -> Result<usize> {
    let scaled = match value {
        Some(v) => v.scaled_value(replicas)?,
        None => 1,
    };
    Ok(scaled.max(1) as usize)
}

/// Drives one StatefulSet toward its spec through the pod, status and
/// history collaborators.
pub struct StatefulSetControl {
    pod_control: Arc<dyn StatefulPodControl>,
    status_updater: Arc<dyn StatusUpdater>,
    history: Arc<dyn ControllerHistory>,
    config: ReconcilerConfig,
}

impl StatefulSetControl {
    pub fn new(
        pod_control: Arc<dyn StatefulPodControl>,
        status_updater: Arc<dyn StatusUpdater>,
        history: Arc<dyn ControllerHistory>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            pod_control,
            status_updater,
            history,
            config,
        }
    }

    /// Reconcile `set` against `pods`, every pod matching its selector
    /// whatever the ordinal. Returns the status that was computed.
    ///
    /// Status is written even when the pass fails; pruning errors are
    /// reported together with the pass error.
    pub async fn update_stateful_set(&self, set: &StatefulSet, pods: &[Pod]) -> Result<StatefulSetStatus> {
        let set = set.clone();
        let revisions = self.list_revisions(&set).await?;
        let ctx = resolve_revisions(self.history.as_ref(), &set, &revisions, &self.config).await?;

        let result = self.perform_update(&set, &ctx, pods).await;
        let pruned = truncate_history(
            self.history.as_ref(),
            &set,
            pods,
            &revisions,
            &ctx.current_revision,
            &ctx.update_revision,
        )
        .await;

        match (result, pruned) {
            (Ok(status), Ok(())) => Ok(status),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(e), Err(p)) => Err(aggregate(vec![e, p])),
        }
    }

    /// Revisions owned by `set`, oldest first.
    pub async fn list_revisions(&self, set: &StatefulSet) -> Result<Vec<ControllerRevision>> {
        let mut revisions: Vec<ControllerRevision> = self
            .history
            .list(set)
            .await?
            .into_iter()
            .filter(|r| is_owned_by(r, set))
            .collect();
        sort_revisions(&mut revisions);
        Ok(revisions)
    }

    async fn perform_update(&self, set: &StatefulSet, ctx: &ReconcileContext, pods: &[Pod]) -> Result<StatefulSetStatus> {
        let (mut status, result) = self.update_replicas(set, ctx, pods).await;
        complete_rolling_update(set, &mut status);

        let written = if inconsistent_status(set, &status) {
            self.status_updater.update_status(set, &status).await
        } else {
            Ok(())
        };
        if written.is_ok() {
            debug!(
                "StatefulSet {}/{}: replicas={} ready={} current={} updated={} (revisions {} -> {})",
                set.namespace,
                set.name,
                status.replicas,
                status.ready_replicas,
                status.current_replicas,
                status.updated_replicas,
                status.current_revision,
                status.update_revision
            );
        }

        match (result, written) {
            (Ok(()), Ok(())) => Ok(status),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(e), Err(w)) => Err(aggregate(vec![e, w])),
        }
    }

    /// Partition the pods, run every pass, and return the status of what was
    /// observed together with the outcome of the passes.
    async fn update_replicas(
        &self,
        set: &StatefulSet,
        ctx: &ReconcileContext,
        pods: &[Pod],
    ) -> (StatefulSetStatus, Result<()>) {
        let mut status = StatefulSetStatus {
            observed_generation: set.generation,
            current_revision: ctx.current_revision.clone(),
            update_revision: ctx.update_revision.clone(),
            collision_count: ctx.collision_count,
            ..Default::default()
        };
        let (replicas, condemned) = partition_replicas(set, ctx, pods);
        refresh_status(&mut status, set, ctx, &replicas, &condemned);

        let result = self
            .run_passes(set, ctx, &replicas, &condemned, &mut status)
            .await;
        (status, result)
    }

    async fn run_passes(
        &self,
        set: &StatefulSet,
        ctx: &ReconcileContext,
        replicas: &[Replica],
        condemned: &[Pod],
        status: &mut StatefulSetStatus,
    ) -> Result<()> {
        let first_unhealthy = replicas
            .iter()
            .filter(|r| !r.is_healthy())
            .map(Replica::pod)
            .chain(condemned.iter().rev().filter(|p| !is_healthy(p)))
            .next()
            .map(|p| p.name.clone());
        let unhealthy = replicas.iter().filter(|r| !r.is_healthy()).count()
            + condemned.iter().filter(|p| !is_healthy(p)).count();
        if unhealthy > 0 {
            debug!(
                "StatefulSet {}/{}: {} unhealthy pods, first is {}",
                set.namespace,
                set.name,
                unhealthy,
                first_unhealthy.as_deref().unwrap_or_default()
            );
        }

        if set.deletion_timestamp.is_some() {
            return Ok(());
        }

        let exit = run_for_all(
            replicas.len(),
            |i| self.process_replica(set, ctx, replicas, i),
            ctx.monotonic,
        )
        .await?;
        if exit {
            return Ok(());
        }

        if self.config.auto_delete_pvc {
            let exit = run_for_all(
                condemned.len(),
                |i| self.fix_condemned_claims(ctx, &condemned[i]),
                ctx.monotonic,
            )
            .await?;
            if exit {
                return Ok(());
            }
        }

        let exit = run_for_all(
            condemned.len(),
            |i| self.process_condemned(set, ctx, &condemned[i], first_unhealthy.as_deref()),
            ctx.monotonic,
        )
        .await?;
        if exit {
            return Ok(());
        }

        match &set.spec.update_strategy {
            StatefulSetUpdateStrategy::OnDelete => Ok(()),
            StatefulSetUpdateStrategy::RollingUpdate {
                partition,
                max_unavailable: unavailable,
            } => {
                let floor = *partition as usize;
                if self.config.bounded_max_unavailable {
                    let limit = max_unavailable(unavailable.as_ref(), set.spec.replicas)?;
                    self.bounded_rolling_update(set, ctx, replicas, floor, limit, status)
                        .await
                } else {
                    self.rolling_update(set, ctx, replicas, floor, status).await
                }
            }
        }
    }

    /// Move slot `i` one step toward its desired state. Returns `Ok(true)`
    /// when nothing past this slot may be touched in this pass.
    async fn process_replica(
        &self,
        set: &StatefulSet,
        ctx: &ReconcileContext,
        replicas: &[Replica],
        i: usize,
    ) -> Result<bool> {
        let pod = match &replicas[i] {
            Replica::Planned(pod) => return self.create_replica(set, ctx, pod).await,
            Replica::Live(pod) => pod,
        };

        // Finished pods are replaced on the pass after their removal is observed.
        if is_failed(pod) || is_succeeded(pod) {
            if !is_terminating(pod) {
                info!(
                    "StatefulSet {}/{}: pod {} is {}, deleting for recreation",
                    set.namespace, set.name, pod.name, pod.status
                );
                self.pod_control.delete(set, pod).await?;
            }
            return Ok(true);
        }

        if is_pending(pod) {
            self.pod_control.create_missing_claims(set, pod).await?;
        }

        if ctx.monotonic {
            if is_terminating(pod) {
                debug!("StatefulSet {}/{}: waiting for {} to terminate", set.namespace, set.name, pod.name);
                return Ok(true);
            }
            if !is_running_and_ready(pod) {
                debug!("StatefulSet {}/{}: waiting for {} to be ready", set.namespace, set.name, pod.name);
                return Ok(true);
            }
            if !is_running_and_available(pod, set.spec.min_ready_seconds, ctx.now) {
                debug!("StatefulSet {}/{}: waiting for {} to be available", set.namespace, set.name, pod.name);
                return Ok(true);
            }
        }

        // Claims of a pod that is mid-update may not resolve yet; count that as a match.
        let retention_match = !self.config.auto_delete_pvc
            || self
                .pod_control
                .claims_match_retention_policy(&ctx.update_set, pod)
                .await
                .unwrap_or(true);
        if identity_matches(set, pod) && storage_matches(set, pod) && retention_match {
            return Ok(false);
        }

        let mut replica = pod.clone();
        update_identity(set, &mut replica);
        update_storage(&ctx.update_set, &mut replica);
        info!(
            "StatefulSet {}/{}: updating identity and storage of {}",
            set.namespace, set.name, replica.name
        );
        self.pod_control.update(&ctx.update_set, &replica).await?;
        Ok(false)
    }

    async fn create_replica(&self, set: &StatefulSet, ctx: &ReconcileContext, pod: &Pod) -> Result<bool> {
        if self.config.auto_delete_pvc && self.pod_control.claim_is_stale(set, pod).await? {
            warn!(
                "StatefulSet {}/{}: claims of {} still belong to a previous pod, retrying later",
                set.namespace, set.name, pod.name
            );
            return Ok(true);
        }
        if self.claims_update_in_place(ctx) {
            self.pod_control.apply_claims(set, pod, false).await?;
        }
        self.pod_control.create(set, pod).await?;
        Ok(ctx.monotonic)
    }

    async fn fix_condemned_claims(&self, ctx: &ReconcileContext, pod: &Pod) -> Result<bool> {
        if !self
            .pod_control
            .claims_match_retention_policy(&ctx.update_set, pod)
            .await?
        {
            self.pod_control
                .update_claim_for_retention_policy(&ctx.update_set, pod)
                .await?;
        }
        Ok(false)
    }

    /// Delete one pod outside the window. In ordered mode a pod that is not
    /// healthy waits unless it is the first unhealthy pod of the set.
    async fn process_condemned(
        &self,
        set: &StatefulSet,
        ctx: &ReconcileContext,
        pod: &Pod,
        first_unhealthy: Option<&str>,
    ) -> Result<bool> {
        if is_terminating(pod) {
            return Ok(ctx.monotonic);
        }
        let is_first_unhealthy = first_unhealthy == Some(pod.name.as_str());
        if ctx.monotonic && !is_first_unhealthy {
            if !is_running_and_ready(pod) || !is_running_and_available(pod, set.spec.min_ready_seconds, ctx.now) {
                debug!(
                    "StatefulSet {}/{}: {} must be healthy before scale-down can delete it",
                    set.namespace, set.name, pod.name
                );
                return Ok(true);
            }
        }
        info!("StatefulSet {}/{}: terminating {} for scale down", set.namespace, set.name, pod.name);
        self.pod_control.delete(set, pod).await?;
        Ok(ctx.monotonic)
    }

    /// Update at most one pod per call, from the highest index down to `floor`.
    async fn rolling_update(
        &self,
        set: &StatefulSet,
        ctx: &ReconcileContext,
        replicas: &[Replica],
        floor: usize,
        status: &mut StatefulSetStatus,
    ) -> Result<()> {
        for replica in replicas.iter().skip(floor).rev() {
            let pod = replica.pod();
            let revision = get_pod_revision(pod);
            if replica.is_created() && revision != ctx.update_revision && !is_terminating(pod) {
                if ctx.template_matches.contains(revision) {
                    return self.hot_patch(set, ctx, pod, status).await;
                }
                info!(
                    "StatefulSet {}/{}: terminating {} for update to {}",
                    set.namespace, set.name, pod.name, ctx.update_revision
                );
                self.pod_control.delete(set, pod).await?;
                status.current_replicas = status.current_replicas.saturating_sub(1);
                return Ok(());
            }
            if !replica.is_healthy() {
                debug!("StatefulSet {}/{}: waiting for {} to update", set.namespace, set.name, pod.name);
                return Ok(());
            }
        }
        Ok(())
    }

    /// Delete outdated pods from the highest index down to `floor` while
    /// keeping at most `limit` pods of the window unavailable.
    async fn bounded_rolling_update(
        &self,
        set: &StatefulSet,
        ctx: &ReconcileContext,
        replicas: &[Replica],
        floor: usize,
        limit: usize,
        status: &mut StatefulSetStatus,
    ) -> Result<()> {
        let unavailable = replicas
            .iter()
            .filter(|r| !r.is_available(set.spec.min_ready_seconds, ctx.now))
            .count();
        if unavailable >= limit {
            debug!(
                "StatefulSet {}/{}: {} unavailable pods, at most {} allowed",
                set.namespace, set.name, unavailable, limit
            );
            return Ok(());
        }

        let mut budget = limit - unavailable;
        for replica in replicas.iter().skip(floor).rev() {
            if budget == 0 {
                break;
            }
            let Replica::Live(pod) = replica else { continue };
            if get_pod_revision(pod) == ctx.update_revision || is_terminating(pod) {
                continue;
            }
            info!(
                "StatefulSet {}/{}: terminating {} for update to {}",
                set.namespace, set.name, pod.name, ctx.update_revision
            );
            self.pod_control.delete(set, pod).await?;
            status.current_replicas = status.current_replicas.saturating_sub(1);
            budget -= 1;
        }
        Ok(())
    }

    /// Move a pod whose template already matches the update revision onto it
    /// without recreating it.
    async fn hot_patch(
        &self,
        set: &StatefulSet,
        ctx: &ReconcileContext,
        pod: &Pod,
        status: &mut StatefulSetStatus,
    ) -> Result<()> {
        let update_set = &ctx.update_set;
        if self.claims_update_in_place(ctx) {
            self.pod_control.apply_claims(update_set, pod, true).await?;
            self.pod_control.apply_claims(update_set, pod, false).await?;
            if !self.pod_control.ready_for_update(update_set, pod).await? {
                debug!(
                    "StatefulSet {}/{}: waiting for claims of {} to resize",
                    set.namespace, set.name, pod.name
                );
                return Ok(());
            }
        }

        let previous = get_pod_revision(pod).to_string();
        let mut patched = pod.clone();
        set_pod_revision(&mut patched, &ctx.update_revision);
        self.pod_control.update(update_set, &patched).await?;
        info!(
            "StatefulSet {}/{}: moved {} from {} to {} in place",
            set.namespace, set.name, pod.name, previous, ctx.update_revision
        );
        if previous == ctx.current_revision {
            status.current_replicas = status.current_replicas.saturating_sub(1);
        }
        status.updated_replicas += 1;
        Ok(())
    }

    fn claims_update_in_place(&self, ctx: &ReconcileContext) -> bool {
        self.config.update_claim_template
            && ctx.update_set.spec.volume_claim_update_policy == VolumeClaimUpdatePolicy::InPlace
    }
}

/// Slot every pod inside the window by ordinal and plan a pod for each empty
/// slot. Pods outside the window come back sorted highest ordinal first.
/// Pods whose name carries no ordinal are dropped.
pub fn partition_replicas(set: &StatefulSet, ctx: &ReconcileContext, pods: &[Pod]) -> (Vec<Replica>, Vec<Pod>) {
    let start = start_ordinal(set);
    let mut slots: Vec<Option<Pod>> = vec![None; set.spec.replicas as usize];
    let mut condemned = Vec::new();
    for pod in pods {
        let Some(ordinal) = get_ordinal(pod) else {
            continue;
        };
        if pod_in_ordinal_range(pod, set) {
            slots[(ordinal - start) as usize] = Some(pod.clone());
        } else {
            condemned.push(pod.clone());
        }
    }
    condemned.sort_by_key(|p| Reverse(get_ordinal(p)));

    let replicas = slots
        .into_iter()
        .zip(start..)
        .map(|(slot, ordinal)| match slot {
            Some(pod) => Replica::Live(pod),
            None => Replica::Planned(new_versioned_stateful_pod(
                &ctx.current_set,
                &ctx.update_set,
                &ctx.current_revision,
                &ctx.update_revision,
                ordinal,
            )),
        })
        .collect();
    (replicas, condemned)
}

/// Recount replicas from the pods observed in the window and outside it.
pub fn refresh_status(
    status: &mut StatefulSetStatus,
    set: &StatefulSet,
    ctx: &ReconcileContext,
    replicas: &[Replica],
    condemned: &[Pod],
) {
    status.replicas = 0;
    status.ready_replicas = 0;
    status.available_replicas = 0;
    status.current_replicas = 0;
    status.updated_replicas = 0;

    let live = replicas
        .iter()
        .filter_map(|r| match r {
            Replica::Live(pod) => Some(pod),
            Replica::Planned(_) => None,
        })
        .chain(condemned.iter());
    for pod in live {
        status.replicas += 1;
        if is_running_and_ready(pod) {
            status.ready_replicas += 1;
            if is_running_and_available(pod, set.spec.min_ready_seconds, ctx.now) {
                status.available_replicas += 1;
            }
        }
        if !is_terminating(pod) {
            let revision = get_pod_revision(pod);
            if revision == ctx.current_revision {
                status.current_replicas += 1;
            }
            if revision == ctx.update_revision {
                status.updated_replicas += 1;
            }
        }
    }
}
