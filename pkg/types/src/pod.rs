use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::OwnerReference;

// Every map in a pod template is ordered: templates are snapshotted into
// revisions and compared byte-for-byte, so encoding must be stable.

// --- Resource requirements ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ResourceRequirements {
    /// CPU in millicores (1000 = 1 core)
    #[serde(default)]
    pub cpu_millis: u64,
    /// Memory in bytes
    #[serde(default)]
    pub memory_bytes: u64,
}

// --- Container spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub volume_mounts: Vec<crate::volume::VolumeMount>,
}

// --- Pod status ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PodStatus {
    #[default]
    Pending,
    Scheduled,
    ContainerCreating,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodStatus::Pending => write!(f, "Pending"),
            PodStatus::Scheduled => write!(f, "Scheduled"),
            PodStatus::ContainerCreating => write!(f, "ContainerCreating"),
            PodStatus::Running => write!(f, "Running"),
            PodStatus::Succeeded => write!(f, "Succeeded"),
            PodStatus::Failed => write!(f, "Failed"),
            PodStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

// --- Pod spec ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
    /// Explicit runtime selection: "youki", "crun", "vm"
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub node_affinity: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<crate::volume::Volume>,
}

/// Template from which a workload stamps out its pods.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PodTemplate {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: PodSpec,
}

// --- Pod ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pod {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
    /// Human-readable reason for the current status (e.g. error message on failure).
    #[serde(default)]
    pub status_message: Option<String>,
    /// The node this pod is assigned to (set by scheduler)
    #[serde(default)]
    pub node_name: Option<String>,
    /// Labels for selector-based matching
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Owner reference (e.g. the StatefulSet that created this pod)
    #[serde(default)]
    pub owner_ref: Option<OwnerReference>,
    /// When the Ready condition last became true; `None` while not ready.
    #[serde(default)]
    pub ready_since: Option<DateTime<Utc>>,
    /// Set once deletion has been requested; the pod is terminating.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Number of times this pod has been restarted
    #[serde(default)]
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
}
