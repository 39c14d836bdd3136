use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::BTreeMap;

use crate::meta::OwnerReference;

/// Serialized snapshot of the parts of a workload that define its pods.
///
/// Kept as raw JSON so equality is a byte comparison of what was stored,
/// never a structural one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionData {
    pub template: Box<RawValue>,
    pub volume_claim_templates: Box<RawValue>,
}

impl RevisionData {
    pub fn template_bytes(&self) -> &[u8] {
        self.template.get().as_bytes()
    }

    pub fn claim_bytes(&self) -> &[u8] {
        self.volume_claim_templates.get().as_bytes()
    }

    /// True when both the pod template and the claim templates are byte-identical.
    pub fn same_as(&self, other: &RevisionData) -> bool {
        self.template_bytes() == other.template_bytes() && self.claim_bytes() == other.claim_bytes()
    }
}

/// Immutable, numbered snapshot of a StatefulSet's templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerRevision {
    pub id: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Owner reference (StatefulSet that manages this revision)
    #[serde(default)]
    pub owner_ref: Option<OwnerReference>,
    pub data: RevisionData,
    /// Ordering key; bumped to the front when a revision is rolled back to.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::to_raw_value;

    fn data(template: &str, claims: &str) -> RevisionData {
        RevisionData {
            template: RawValue::from_string(template.to_string()).unwrap(),
            volume_claim_templates: RawValue::from_string(claims.to_string()).unwrap(),
        }
    }

    #[test]
    fn byte_equality() {
        let a = data(r#"{"a":1}"#, "[]");
        assert!(a.same_as(&data(r#"{"a":1}"#, "[]")));
        assert!(!a.same_as(&data(r#"{"a":1}"#, r#"[{"name":"data"}]"#)));
        // structurally equal but differently encoded values are different revisions
        assert!(!a.same_as(&data(r#"{ "a": 1 }"#, "[]")));
    }

    #[test]
    fn raw_payload_survives_storage() {
        let rev = ControllerRevision {
            id: "id".into(),
            name: "web-abc".into(),
            namespace: "default".into(),
            labels: BTreeMap::new(),
            owner_ref: None,
            data: RevisionData {
                template: to_raw_value(&serde_json::json!({"spec": {"containers": []}})).unwrap(),
                volume_claim_templates: to_raw_value(&Vec::<u8>::new()).unwrap(),
            },
            revision: 4,
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&rev).unwrap();
        let back: ControllerRevision = serde_json::from_slice(&bytes).unwrap();
        assert!(back.data.same_as(&rev.data));
        assert_eq!(back.revision, 4);
    }
}
