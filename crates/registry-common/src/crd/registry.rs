//! Registry CRD - declares one managed registry workload
//!
//! The operator never creates the workload objects from this spec; a separate
//! factory does that on first creation. The fields here drive the control
//! functions that keep the existing objects converged.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Field path of the HTTPS secret reference, reported on configuration errors
pub const HTTPS_SECRET_NAME_FIELD: &str = "spec.configuration.security.https.secretName";

// =============================================================================
// CRD
// =============================================================================

/// Spec for a Registry instance
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "registry.dev",
    version = "v1",
    kind = "Registry",
    plural = "registries",
    shortname = "reg",
    namespaced,
    status = "RegistryStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Application configuration
    #[serde(default)]
    pub configuration: ConfigurationSpec,

    /// Deployment customization
    #[serde(default)]
    pub deployment: RegistryDeploymentSpec,
}

/// Application configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSpec {
    /// Storage backend (e.g., "mem", "sql", "kafkasql")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<String>,

    /// Application log level (e.g., "DEBUG", "INFO")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Transport security settings
    #[serde(default)]
    pub security: SecuritySpec,
}

/// Transport security settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// HTTPS settings
    #[serde(default)]
    pub https: HttpsSpec,
}

/// HTTPS settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpsSpec {
    /// Name of a Secret holding `tls.crt` and `tls.key`; HTTPS is enabled when set and valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Disable the plain HTTP port; only honored while HTTPS is enabled
    #[serde(default)]
    pub disable_http: bool,
}

/// Deployment customization
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDeploymentSpec {
    /// Extra metadata for the pod template
    #[serde(default)]
    pub metadata: PodMetadata,
}

/// Extra metadata applied to the pod template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadata {
    /// Labels layered on top of the operator's labels; user values win on collision
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl RegistrySpec {
    /// Declared HTTPS secret name, empty when none is declared
    pub fn https_secret_name(&self) -> &str {
        self.configuration
            .security
            .https
            .secret_name
            .as_deref()
            .unwrap_or_default()
    }

    /// Whether the plain HTTP port is requested to stay open
    pub fn http_enabled(&self) -> bool {
        !self.configuration.security.https.disable_http
    }

    /// Declared log level, if any
    pub fn log_level(&self) -> Option<&str> {
        self.configuration
            .log_level
            .as_deref()
            .filter(|level| !level.is_empty())
    }

    /// User-declared extra pod labels
    pub fn extra_pod_labels(&self) -> &BTreeMap<String, String> {
        &self.deployment.metadata.labels
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of a Registry instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    /// Generation observed by the last completed tick
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions reported by the control functions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
