//! Canonical labels stamped on every object of a managed registry
//!
//! The label set is derived from static identity only (instance name and
//! operator version), so recomputing it every tick always yields the same map.

use std::collections::BTreeMap;

use crate::{OPERATOR_NAME, OPERATOR_VERSION};

/// Label selecting the objects that belong to one instance
pub const APP_LABEL: &str = "app";
/// Recommended label: application name
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// Recommended label: instance name
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
/// Recommended label: application version
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";
/// Recommended label: component within the architecture
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
/// Recommended label: higher-level application this is part of
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
/// Recommended label: tool managing the object
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Application name used for the `name` and `part-of` labels
pub const APPLICATION_NAME: &str = "registry";

/// Component name used for the `component` label
pub const COMPONENT_NAME: &str = "server";

/// Compute the canonical label set for an instance
pub fn canonical_labels(instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), instance.to_string()),
        (NAME_LABEL.to_string(), APPLICATION_NAME.to_string()),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
        (VERSION_LABEL.to_string(), OPERATOR_VERSION.to_string()),
        (COMPONENT_LABEL.to_string(), COMPONENT_NAME.to_string()),
        (PART_OF_LABEL.to_string(), APPLICATION_NAME.to_string()),
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
    ])
}

/// Label selector matching every object of an instance
pub fn instance_selector(instance: &str) -> String {
    format!("{APP_LABEL}={instance}")
}
