//! Well-known label keys stamped on managed objects.

/// Label carrying the name of the revision a pod was created from.
pub const CONTROLLER_REVISION_HASH: &str = "controller-revision-hash";

/// Label carrying a stateful pod's own name, used for per-pod services.
pub const STATEFULSET_POD_NAME: &str = "statefulset.kubernetes.io/pod-name";

/// Label carrying a stateful pod's ordinal.
pub const POD_INDEX: &str = "apps.kubernetes.io/pod-index";
