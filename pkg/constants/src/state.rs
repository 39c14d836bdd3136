//! State store key layout.

/// Prefix under which every namespace is registered.
pub const NAMESPACES_PREFIX: &str = "/registry/namespaces/";

/// Prefix for pods. Full key = `PODS_PREFIX + namespace + "/" + name`.
pub const PODS_PREFIX: &str = "/registry/pods/";

/// Prefix for StatefulSets.
pub const STATEFULSETS_PREFIX: &str = "/registry/statefulsets/";

/// Prefix for persistent volume claims.
pub const PVCS_PREFIX: &str = "/registry/persistentvolumeclaims/";

/// Prefix for controller revisions.
pub const CONTROLLER_REVISIONS_PREFIX: &str = "/registry/controllerrevisions/";

/// Build the key of a namespaced object under `prefix`.
pub fn object_key(prefix: &str, namespace: &str, name: &str) -> String {
    format!("{}{}/{}", prefix, namespace, name)
}

/// Build the scan prefix for every object of a kind in `namespace`.
pub fn namespace_prefix(prefix: &str, namespace: &str) -> String {
    format!("{}{}/", prefix, namespace)
}
