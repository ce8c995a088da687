//! Registry operator - hosts one reconciliation loop per Registry instance
//!
//! - [`config`]: flags and environment of the operator binary
//! - [`controller`]: kube-runtime reconcile and error policy around a tick
//! - [`kube_client`]: kube-rs implementations of the cluster traits
//! - [`runner`]: assembles the watching controller

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod kube_client;
pub mod runner;

pub use config::OperatorConfig;
pub use controller::{error_policy, reconcile, Context, RegistryKubeClient, FINALIZER};
pub use kube_client::KubeClusterClient;
pub use runner::build_registry_controller;
