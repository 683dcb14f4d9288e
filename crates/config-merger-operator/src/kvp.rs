//! Annotation and label keys understood by the operator.
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

/// Opts a ConfigMap into merging. Only the exact value [`WATCH_ENABLED`] counts.
pub const WATCH_ANNOTATION: &str = "config-merger.k8s.io/watch";

/// Names the derived ConfigMap a source contributes to.
pub const TARGET_ANNOTATION: &str = "config-merger.k8s.io/target";

/// The only value of [`WATCH_ANNOTATION`] that opts a ConfigMap in.
pub const WATCH_ENABLED: &str = "true";

/// Set on every derived ConfigMap written by the operator.
pub const APP_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Returns `true` if the ConfigMap carries [`WATCH_ANNOTATION`] with the value `"true"`.
///
/// This is a case-sensitive string comparison. `"True"`, `"yes"` or `"1"` do not opt in.
pub fn is_watched(config_map: &ConfigMap) -> bool {
    config_map
        .annotations()
        .get(WATCH_ANNOTATION)
        .is_some_and(|value| value == WATCH_ENABLED)
}

/// Returns the name of the derived ConfigMap, if the [`TARGET_ANNOTATION`] is present.
pub fn target_name(config_map: &ConfigMap) -> Option<&str> {
    config_map
        .annotations()
        .get(TARGET_ANNOTATION)
        .map(String::as_str)
}
