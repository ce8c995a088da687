//! kube-rs backed cluster access for the control loop

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use registry_common::crd::{Registry, RegistryStatus};
use registry_common::labels::instance_selector;
use registry_common::{Error, OPERATOR_NAME};
use registry_controller::{
    Cached, LegacyPodDisruptionBudget, ResourceCache, ResourceWriter, SecretClient,
};

use crate::controller::{RegistryKubeClient, FINALIZER};

/// Cluster access through a kube-rs [`Client`]
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn legacy_pdb_resource() -> ApiResource {
        ApiResource {
            group: "policy".to_string(),
            version: "v1beta1".to_string(),
            api_version: LegacyPodDisruptionBudget::API_VERSION.to_string(),
            kind: LegacyPodDisruptionBudget::KIND.to_string(),
            plural: "poddisruptionbudgets".to_string(),
        }
    }

    async fn refresh_kind<K>(
        &self,
        resources: &mut ResourceCache,
        namespace: &str,
        selector: &str,
    ) -> Result<(), Error>
    where
        K: Cached + Resource<Scope = NamespaceResourceScope, DynamicType = ()> + DeserializeOwned + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.list(&ListParams::default().labels(selector)).await {
            Ok(list) => match list.items.into_iter().next() {
                Some(object) => resources.set(object.name_any(), object),
                None => resources.remove::<K>(),
            },
            Err(e) => {
                let e = Error::from(e);
                if !e.is_not_found() {
                    return Err(e);
                }
                resources.remove::<K>();
            }
        }
        Ok(())
    }

    async fn refresh_legacy_pdb(
        &self,
        resources: &mut ResourceCache,
        namespace: &str,
        selector: &str,
    ) -> Result<(), Error> {
        let ar = Self::legacy_pdb_resource();
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let first = match api.list(&ListParams::default().labels(selector)).await {
            Ok(list) => list.items.into_iter().next(),
            Err(e) => {
                // Clusters from 1.25 on no longer serve policy/v1beta1
                let e = Error::from(e);
                if !e.is_not_found() {
                    return Err(e);
                }
                None
            }
        };

        match first {
            Some(object) => {
                let name = object.name_any();
                resources.set(name, legacy_pdb_from_dynamic(object));
            }
            None => resources.remove::<LegacyPodDisruptionBudget>(),
        }
        Ok(())
    }

    async fn replace<K>(&self, namespace: &str, name: &str, object: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.replace(name, &PostParams::default(), object).await?)
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<Registry> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

fn legacy_pdb_from_dynamic(object: DynamicObject) -> LegacyPodDisruptionBudget {
    LegacyPodDisruptionBudget {
        metadata: object.metadata,
        spec: object.data.get("spec").cloned(),
    }
}

fn legacy_pdb_to_dynamic(name: &str, pdb: &LegacyPodDisruptionBudget) -> DynamicObject {
    let mut object = DynamicObject::new(name, &KubeClusterClient::legacy_pdb_resource());
    object.metadata = pdb.metadata.clone();
    if let Some(spec) = &pdb.spec {
        object.data = serde_json::json!({ "spec": spec });
    }
    object
}

#[async_trait]
impl SecretClient for KubeClusterClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }
}

#[async_trait]
impl ResourceWriter for KubeClusterClient {
    async fn write_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        self.replace(namespace, name, deployment).await
    }

    async fn write_service(
        &self,
        namespace: &str,
        name: &str,
        service: &Service,
    ) -> Result<Service, Error> {
        self.replace(namespace, name, service).await
    }

    async fn write_network_policy(
        &self,
        namespace: &str,
        name: &str,
        policy: &NetworkPolicy,
    ) -> Result<NetworkPolicy, Error> {
        self.replace(namespace, name, policy).await
    }

    async fn write_ingress(
        &self,
        namespace: &str,
        name: &str,
        ingress: &Ingress,
    ) -> Result<Ingress, Error> {
        self.replace(namespace, name, ingress).await
    }

    async fn write_pdb(
        &self,
        namespace: &str,
        name: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget, Error> {
        self.replace(namespace, name, pdb).await
    }

    async fn write_legacy_pdb(
        &self,
        namespace: &str,
        name: &str,
        pdb: &LegacyPodDisruptionBudget,
    ) -> Result<LegacyPodDisruptionBudget, Error> {
        let ar = Self::legacy_pdb_resource();
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let accepted = api
            .replace(name, &PostParams::default(), &legacy_pdb_to_dynamic(name, pdb))
            .await?;
        Ok(legacy_pdb_from_dynamic(accepted))
    }
}

#[async_trait]
impl RegistryKubeClient for KubeClusterClient {
    async fn refresh(&self, registry: &Registry, resources: &mut ResourceCache) -> Result<(), Error> {
        let namespace = registry
            .namespace()
            .ok_or_else(|| Error::configuration("Registry is missing a namespace"))?;
        let selector = instance_selector(&registry.name_any());
        debug!(%namespace, %selector, "refreshing resource cache");

        self.refresh_kind::<Deployment>(resources, &namespace, &selector).await?;
        self.refresh_kind::<Service>(resources, &namespace, &selector).await?;
        self.refresh_kind::<NetworkPolicy>(resources, &namespace, &selector).await?;
        self.refresh_kind::<Ingress>(resources, &namespace, &selector).await?;
        self.refresh_kind::<PodDisruptionBudget>(resources, &namespace, &selector).await?;
        self.refresh_legacy_pdb(resources, &namespace, &selector).await
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &RegistryStatus,
    ) -> Result<(), Error> {
        let api: Api<Registry> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(OPERATOR_NAME), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_finalizer(&self, registry: &Registry) -> Result<(), Error> {
        let namespace = registry.namespace().unwrap_or_default();
        let mut finalizers = registry.finalizers().to_vec();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        finalizers.push(FINALIZER.to_string());
        self.patch_finalizers(&registry.name_any(), &namespace, finalizers)
            .await
    }

    async fn remove_finalizer(&self, registry: &Registry) -> Result<(), Error> {
        let namespace = registry.namespace().unwrap_or_default();
        let finalizers = registry
            .finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect();
        self.patch_finalizers(&registry.name_any(), &namespace, finalizers)
            .await
    }
}
