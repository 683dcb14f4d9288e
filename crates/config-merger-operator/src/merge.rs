//! Computes the data of a derived ConfigMap.
//!
//! The merge is a pure function of its inputs: it performs no I/O and keeps no state, so calling
//! it twice with the same listing yields the same mapping.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use crate::kvp;

/// Separates the source ConfigMap name from the source key in a merged key.
pub const KEY_SEPARATOR: char = '.';

/// Flattens the data of all opted-in `config_maps` into a single mapping.
///
/// Every key `key` of a ConfigMap named `name` becomes `name.key`. ConfigMaps are skipped if
///
/// - their name equals `target_name`, so the derived ConfigMap never merges its own output, or
/// - they are not opted in via [`kvp::WATCH_ANNOTATION`].
///
/// Entries are written in iteration order, so a later identical composite key overwrites an
/// earlier one. Since names are unique within a namespace this does not happen for a namespace
/// listing.
pub fn merge_config_maps<'a>(
    config_maps: impl IntoIterator<Item = &'a ConfigMap>,
    target_name: &str,
) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();

    for config_map in config_maps {
        let name = config_map.name_any();
        if name == target_name || !kvp::is_watched(config_map) {
            continue;
        }

        for (key, value) in config_map.data.iter().flatten() {
            merged.insert(format!("{name}{KEY_SEPARATOR}{key}"), value.clone());
        }
    }

    merged
}

/// Size of the merged data in bytes, counting values only.
pub fn merged_size_bytes(data: &BTreeMap<String, String>) -> u64 {
    data.values().map(|value| value.len() as u64).sum()
}
