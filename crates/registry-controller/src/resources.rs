//! Resource cache - last committed snapshot of every managed object
//!
//! Each managed kind has its own strongly-typed slot. Control functions read the
//! committed snapshot and enqueue pure patches; patches for one entry are
//! composed in enqueue order and written once per tick by the flusher. Sense
//! therefore never observes an uncommitted intra-tick patch.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use registry_common::crd::Registry;
use serde::{Deserialize, Serialize};

/// Keys of the managed resource slots
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKey {
    /// The registry Deployment
    Deployment,
    /// The registry Service
    Service,
    /// The registry NetworkPolicy
    NetworkPolicy,
    /// The registry Ingress
    Ingress,
    /// PodDisruptionBudget, `policy/v1`
    PdbV1,
    /// PodDisruptionBudget, `policy/v1beta1`
    PdbV1beta1,
    /// The Registry custom resource itself
    Spec,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::Ingress => "Ingress",
            Self::PdbV1 => "PodDisruptionBudget/v1",
            Self::PdbV1beta1 => "PodDisruptionBudget/v1beta1",
            Self::Spec => "Registry",
        };
        f.write_str(name)
    }
}

/// PodDisruptionBudget served under `policy/v1beta1`
///
/// k8s-openapi no longer models the legacy group version, and the operator
/// only ever touches its metadata, so the rest is kept as raw JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPodDisruptionBudget {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Spec, untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,
}

impl LegacyPodDisruptionBudget {
    /// API version of the legacy group
    pub const API_VERSION: &'static str = "policy/v1beta1";
    /// Kind
    pub const KIND: &'static str = "PodDisruptionBudget";
}

/// A pure patch: committed snapshot in, new snapshot out
pub type PatchFn<T> = Box<dyn Fn(&T) -> T + Send + Sync>;

/// One cached object plus the patches queued against it this tick
pub struct CacheEntry<T> {
    name: String,
    value: T,
    patches: Vec<PatchFn<T>>,
}

impl<T: Clone> CacheEntry<T> {
    /// Create an entry holding a committed snapshot
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            value,
            patches: Vec::new(),
        }
    }

    /// Name of the cached object
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The last committed snapshot
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Queue a patch to apply before the next cluster write
    pub fn apply_patch(&mut self, patch: impl Fn(&T) -> T + Send + Sync + 'static) {
        self.patches.push(Box::new(patch));
    }

    /// Number of patches queued this tick
    pub fn pending(&self) -> usize {
        self.patches.len()
    }

    /// Compose the queued patches, in order, over the committed snapshot
    pub fn composed(&self) -> T {
        self.patches
            .iter()
            .fold(self.value.clone(), |value, patch| patch(&value))
    }

    /// Replace the committed snapshot with what the cluster accepted
    pub fn commit(&mut self, value: T) {
        self.value = value;
        self.patches.clear();
    }

    /// Drop queued patches without writing them
    pub fn discard_pending(&mut self) {
        self.patches.clear();
    }
}

impl<T> fmt::Debug for CacheEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("name", &self.name)
            .field("pending", &self.patches.len())
            .finish()
    }
}

/// Binds a snapshot type to its slot in the [`ResourceCache`]
pub trait Cached: Clone + Send + Sync + Sized + 'static {
    /// Key of the slot holding this type
    const KEY: ResourceKey;

    /// Shared access to the slot
    fn slot(cache: &ResourceCache) -> &Option<CacheEntry<Self>>;

    /// Exclusive access to the slot
    fn slot_mut(cache: &mut ResourceCache) -> &mut Option<CacheEntry<Self>>;
}

/// Per-instance store of the last committed snapshot of each managed kind
#[derive(Debug, Default)]
pub struct ResourceCache {
    deployment: Option<CacheEntry<Deployment>>,
    service: Option<CacheEntry<Service>>,
    network_policy: Option<CacheEntry<NetworkPolicy>>,
    ingress: Option<CacheEntry<Ingress>>,
    pdb_v1: Option<CacheEntry<PodDisruptionBudget>>,
    pdb_v1beta1: Option<CacheEntry<LegacyPodDisruptionBudget>>,
    spec: Option<CacheEntry<Registry>>,
}

macro_rules! cached_kind {
    ($ty:ty, $key:ident, $field:ident) => {
        impl Cached for $ty {
            const KEY: ResourceKey = ResourceKey::$key;

            fn slot(cache: &ResourceCache) -> &Option<CacheEntry<Self>> {
                &cache.$field
            }

            fn slot_mut(cache: &mut ResourceCache) -> &mut Option<CacheEntry<Self>> {
                &mut cache.$field
            }
        }
    };
}

cached_kind!(Deployment, Deployment, deployment);
cached_kind!(Service, Service, service);
cached_kind!(NetworkPolicy, NetworkPolicy, network_policy);
cached_kind!(Ingress, Ingress, ingress);
cached_kind!(PodDisruptionBudget, PdbV1, pdb_v1);
cached_kind!(LegacyPodDisruptionBudget, PdbV1beta1, pdb_v1beta1);
cached_kind!(Registry, Spec, spec);

impl ResourceCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry of a kind; `None` means "not yet created"
    pub fn get<T: Cached>(&self) -> Option<&CacheEntry<T>> {
        T::slot(self).as_ref()
    }

    /// Whether a kind is cached
    pub fn contains<T: Cached>(&self) -> bool {
        T::slot(self).is_some()
    }

    /// Queue a patch against a kind; returns false when the kind is not cached
    pub fn apply_patch<T: Cached>(&mut self, patch: impl Fn(&T) -> T + Send + Sync + 'static) -> bool {
        match T::slot_mut(self) {
            Some(entry) => {
                entry.apply_patch(patch);
                true
            }
            None => false,
        }
    }

    /// Store a freshly observed snapshot, dropping anything queued against the old one
    pub fn set<T: Cached>(&mut self, name: impl Into<String>, value: T) {
        *T::slot_mut(self) = Some(CacheEntry::new(name, value));
    }

    /// Forget a kind (the object is gone from the cluster)
    pub fn remove<T: Cached>(&mut self) {
        *T::slot_mut(self) = None;
    }

    /// Composed snapshot of a kind if patches are queued and they change it
    ///
    /// Patches that compose to the committed snapshot are dropped here, so a
    /// converged entry never costs a cluster write.
    pub fn take_changed<T: Cached + PartialEq>(&mut self) -> Option<(String, T)> {
        let entry = T::slot_mut(self).as_mut()?;
        if entry.pending() == 0 {
            return None;
        }
        let next = entry.composed();
        if &next == entry.value() {
            entry.discard_pending();
            return None;
        }
        Some((entry.name().to_string(), next))
    }

    /// Record what the cluster accepted for a kind
    pub fn commit<T: Cached>(&mut self, value: T) {
        if let Some(entry) = T::slot_mut(self) {
            entry.commit(value);
        }
    }

    /// Number of patches queued per key this tick
    pub fn pending(&self) -> BTreeMap<ResourceKey, usize> {
        let counts = [
            (ResourceKey::Deployment, self.deployment.as_ref().map(CacheEntry::pending)),
            (ResourceKey::Service, self.service.as_ref().map(CacheEntry::pending)),
            (
                ResourceKey::NetworkPolicy,
                self.network_policy.as_ref().map(CacheEntry::pending),
            ),
            (ResourceKey::Ingress, self.ingress.as_ref().map(CacheEntry::pending)),
            (ResourceKey::PdbV1, self.pdb_v1.as_ref().map(CacheEntry::pending)),
            (
                ResourceKey::PdbV1beta1,
                self.pdb_v1beta1.as_ref().map(CacheEntry::pending),
            ),
            (ResourceKey::Spec, self.spec.as_ref().map(CacheEntry::pending)),
        ];
        counts
            .into_iter()
            .filter_map(|(key, count)| count.filter(|c| *c > 0).map(|c| (key, c)))
            .collect()
    }

    /// Drop every queued patch
    pub fn discard_pending(&mut self) {
        fn discard<T: Clone>(slot: &mut Option<CacheEntry<T>>) {
            if let Some(entry) = slot {
                entry.discard_pending();
            }
        }
        discard(&mut self.deployment);
        discard(&mut self.service);
        discard(&mut self.network_policy);
        discard(&mut self.ingress);
        discard(&mut self.pdb_v1);
        discard(&mut self.pdb_v1beta1);
        discard(&mut self.spec);
    }
}
