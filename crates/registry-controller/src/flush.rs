//! Writes composed patches back to the cluster, one write per entry

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use tracing::debug;

use registry_common::Result;

use crate::client::ResourceWriter;
use crate::resources::{Cached, LegacyPodDisruptionBudget, ResourceCache};

macro_rules! flush_kind {
    ($cache:ident, $namespace:ident, $writer:ident, $written:ident, $ty:ty, $write:ident) => {
        if let Some((name, next)) = $cache.take_changed::<$ty>() {
            debug!(kind = %<$ty as Cached>::KEY, %name, "writing composed patches");
            let accepted = $writer.$write($namespace, &name, &next).await?;
            $cache.commit::<$ty>(accepted);
            $written += 1;
        }
    };
}

/// Flush every entry with queued patches that change it
///
/// Returns the number of objects written. On error the remaining patches stay
/// queued; the next tick discards them and recomputes from fresh snapshots.
pub async fn flush(
    cache: &mut ResourceCache,
    namespace: &str,
    writer: &dyn ResourceWriter,
) -> Result<usize> {
    let mut written = 0;

    flush_kind!(cache, namespace, writer, written, Deployment, write_deployment);
    flush_kind!(cache, namespace, writer, written, Service, write_service);
    flush_kind!(cache, namespace, writer, written, NetworkPolicy, write_network_policy);
    flush_kind!(cache, namespace, writer, written, Ingress, write_ingress);
    flush_kind!(cache, namespace, writer, written, PodDisruptionBudget, write_pdb);
    flush_kind!(cache, namespace, writer, written, LegacyPodDisruptionBudget, write_legacy_pdb);

    Ok(written)
}
