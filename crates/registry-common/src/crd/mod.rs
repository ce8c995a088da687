//! Custom Resource Definitions for the registry operator

mod registry;
mod types;

pub use registry::{
    ConfigurationSpec, HttpsSpec, PodMetadata, Registry, RegistryDeploymentSpec, RegistrySpec,
    RegistryStatus, SecuritySpec, HTTPS_SECRET_NAME_FIELD,
};
pub use types::{Condition, ConditionStatus};
