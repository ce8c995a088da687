//! Common types for the registry operator: CRD, errors, labels and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod labels;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the operator, used as field manager and `managed-by` label value
pub const OPERATOR_NAME: &str = "registry-operator";

/// Version of the operator, stamped onto managed resources
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
