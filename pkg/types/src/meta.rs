use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of object that owns another object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OwnerKind {
    StatefulSet,
    Pod,
}

/// Reference from a dependent object to the object that owns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: OwnerKind,
    pub name: String,
    /// ID of the owner; a recreated owner with the same name gets a new ID.
    pub uid: String,
}

impl OwnerReference {
    pub fn new(kind: OwnerKind, name: &str, uid: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            uid: uid.to_string(),
        }
    }
}

/// Returns true when every `selector` entry is present in `labels`.
/// An empty selector matches nothing.
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty()
        && selector
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
}
