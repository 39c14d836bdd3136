use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use pkg_constants::controller::DEFAULT_REVISION_HISTORY_LIMIT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pod::PodTemplate;
use crate::volume::PersistentVolumeClaimTemplate;

// --- Int or percent ---

/// A count given either as an absolute number (`2`) or as a share of the
/// replica count (`"50%"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum IntOrPercent {
    Int(u32),
    Percent(String),
}

impl IntOrPercent {
    /// Resolve against `total`. Percentages round up.
    pub fn scaled_value(&self, total: u32) -> anyhow::Result<u32> {
        match self {
            IntOrPercent::Int(v) => Ok(*v),
            IntOrPercent::Percent(raw) => {
                let pct: u64 = raw
                    .strip_suffix('%')
                    .ok_or_else(|| anyhow!("invalid value '{}': expected an integer or a percentage", raw))?
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid percentage '{}'", raw))?;
                let scaled = pct
                    .checked_mul(u64::from(total))
                    .ok_or_else(|| anyhow!("percentage '{}' of {} overflows", raw, total))?
                    .div_ceil(100);
                u32::try_from(scaled).with_context(|| format!("percentage '{}' of {} is out of range", raw, total))
            }
        }
    }
}

// --- Policies ---

/// How pods are created and removed relative to each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PodManagementPolicy {
    /// One pod at a time, in ordinal order, each Ready before the next.
    #[default]
    OrderedReady,
    /// All pods at once with bounded concurrency and no ordering.
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatefulSetUpdateStrategy {
    RollingUpdate {
        /// Pods whose index within the window is below this are never updated.
        #[serde(default)]
        partition: u32,
        #[serde(default)]
        max_unavailable: Option<IntOrPercent>,
    },
    /// Pods are only updated when something else deletes them.
    OnDelete,
}

impl Default for StatefulSetUpdateStrategy {
    fn default() -> Self {
        StatefulSetUpdateStrategy::RollingUpdate {
            partition: 0,
            max_unavailable: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ClaimRetentionPolicyType {
    #[default]
    Retain,
    Delete,
}

/// What happens to per-pod claims when the set is deleted or scaled down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PersistentVolumeClaimRetentionPolicy {
    #[serde(default, alias = "when-deleted")]
    pub when_deleted: ClaimRetentionPolicyType,
    #[serde(default, alias = "when-scaled")]
    pub when_scaled: ClaimRetentionPolicyType,
}

/// Whether claim template changes reach existing claims.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum VolumeClaimUpdatePolicy {
    /// Existing claims keep their shape until they are deleted and recreated.
    #[default]
    OnClaimDelete,
    /// Existing claims are patched to the new template.
    InPlace,
}

// --- StatefulSet status ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatefulSetStatus {
    #[serde(default)]
    pub observed_generation: u64,
    pub replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    pub current_replicas: u32,
    pub updated_replicas: u32,
    #[serde(default)]
    pub current_revision: String,
    #[serde(default)]
    pub update_revision: String,
    #[serde(default)]
    pub collision_count: u32,
}

// --- StatefulSet spec ---

fn default_revision_history_limit() -> u32 {
    DEFAULT_REVISION_HISTORY_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatefulSetSpec {
    pub replicas: u32,
    /// Label selector for matching pods and revisions
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    pub template: PodTemplate,
    #[serde(default)]
    pub volume_claim_templates: Vec<PersistentVolumeClaimTemplate>,
    #[serde(default)]
    pub update_strategy: StatefulSetUpdateStrategy,
    #[serde(default)]
    pub pod_management_policy: PodManagementPolicy,
    #[serde(default = "default_revision_history_limit")]
    pub revision_history_limit: u32,
    /// Seconds a pod must stay Ready before it counts as available
    #[serde(default)]
    pub min_ready_seconds: u32,
    /// First ordinal of the replica window
    #[serde(default)]
    pub ordinals_start: u32,
    #[serde(default)]
    pub persistent_volume_claim_retention_policy: PersistentVolumeClaimRetentionPolicy,
    #[serde(default)]
    pub volume_claim_update_policy: VolumeClaimUpdatePolicy,
}

// --- StatefulSet ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatefulSet {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub spec: StatefulSetSpec,
    #[serde(default)]
    pub status: StatefulSetStatus,
    /// Monotonically increasing generation; bumped on spec changes
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
