use serde::{Deserialize, Serialize};

/// Controller configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/sts-controller/data
/// sync-interval-secs: 10
/// sync-timeout-secs: 30
/// auto-delete-pvc: true
/// update-claim-template: false
/// bounded-max-unavailable: true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "sync-interval-secs")]
    pub sync_interval_secs: Option<u64>,
    #[serde(default, alias = "sync-timeout-secs")]
    pub sync_timeout_secs: Option<u64>,
    /// Forces ordered (`true`) or burst (`false`) processing for every set.
    #[serde(default, alias = "monotonic-override")]
    pub monotonic_override: Option<bool>,
    #[serde(default, alias = "auto-delete-pvc")]
    pub auto_delete_pvc: Option<bool>,
    #[serde(default, alias = "update-claim-template")]
    pub update_claim_template: Option<bool>,
    #[serde(default, alias = "bounded-max-unavailable")]
    pub bounded_max_unavailable: Option<bool>,
}

impl ControllerConfigFile {
    /// Resolve the reconciler switches, filling unset ones with defaults.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        let defaults = ReconcilerConfig::default();
        ReconcilerConfig {
            monotonic_override: self.monotonic_override.or(defaults.monotonic_override),
            auto_delete_pvc: self.auto_delete_pvc.unwrap_or(defaults.auto_delete_pvc),
            update_claim_template: self
                .update_claim_template
                .unwrap_or(defaults.update_claim_template),
            bounded_max_unavailable: self
                .bounded_max_unavailable
                .unwrap_or(defaults.bounded_max_unavailable),
        }
    }
}

/// Behavior switches for the StatefulSet reconciler, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// When set, replaces the per-set pod management policy.
    pub monotonic_override: Option<bool>,
    /// Honor claim retention policies (owner references, stale-claim checks).
    pub auto_delete_pvc: bool,
    /// Push claim template changes to existing claims for `InPlace` sets.
    pub update_claim_template: bool,
    /// Use the `max_unavailable` rolling update instead of one pod per pass.
    pub bounded_max_unavailable: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            monotonic_override: None,
            auto_delete_pvc: true,
            update_claim_template: false,
            bounded_max_unavailable: false,
        }
    }
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg: ControllerConfigFile =
            load_config_file("/nonexistent/sts-controller/config.yaml").unwrap();
        assert!(cfg.data_dir.is_none());
        assert_eq!(cfg.reconciler_config(), ReconcilerConfig::default());
    }

    #[test]
    fn kebab_case_keys() {
        let cfg: ControllerConfigFile = serde_yaml::from_str(
            "data-dir: /data\nbounded-max-unavailable: true\nmonotonic-override: false\n",
        )
        .unwrap();
        assert_eq!(cfg.data_dir.as_deref(), Some("/data"));
        let rc = cfg.reconciler_config();
        assert!(rc.bounded_max_unavailable);
        assert_eq!(rc.monotonic_override, Some(false));
        assert!(rc.auto_delete_pvc);
    }
}
