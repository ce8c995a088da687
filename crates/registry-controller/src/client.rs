//! Cluster access needed by the control loop
//!
//! The core never holds a kube client. Reads and writes go through these
//! traits so a tick can run against an in-memory cluster in tests.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;

#[cfg(test)]
use mockall::automock;

use registry_common::Error;

use crate::resources::LegacyPodDisruptionBudget;

/// Read access to Secrets, scoped to what the HTTPS function needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Fetch a Secret; a missing Secret is an error
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error>;
}

/// Write access for composed patches
///
/// Each method replaces the named object and returns what the API server
/// accepted, which becomes the next committed snapshot.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceWriter: Send + Sync {
    /// Write a Deployment
    async fn write_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Write a Service
    async fn write_service(
        &self,
        namespace: &str,
        name: &str,
        service: &Service,
    ) -> Result<Service, Error>;

    /// Write a NetworkPolicy
    async fn write_network_policy(
        &self,
        namespace: &str,
        name: &str,
        policy: &NetworkPolicy,
    ) -> Result<NetworkPolicy, Error>;

    /// Write an Ingress
    async fn write_ingress(
        &self,
        namespace: &str,
        name: &str,
        ingress: &Ingress,
    ) -> Result<Ingress, Error>;

    /// Write a `policy/v1` PodDisruptionBudget
    async fn write_pdb(
        &self,
        namespace: &str,
        name: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget, Error>;

    /// Write a `policy/v1beta1` PodDisruptionBudget
    async fn write_legacy_pdb(
        &self,
        namespace: &str,
        name: &str,
        pdb: &LegacyPodDisruptionBudget,
    ) -> Result<LegacyPodDisruptionBudget, Error>;
}
