//! Controller runner - builds the Registry controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use registry_common::crd::Registry;
use registry_common::labels::APP_LABEL;

use crate::config::OperatorConfig;
use crate::controller::{error_policy, reconcile, Context};
use crate::kube_client::KubeClusterClient;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Registry owning a Deployment, read from its `app` label
fn owning_registry(deployment: &Deployment) -> Option<ObjectRef<Registry>> {
    let namespace = deployment.metadata.namespace.as_deref()?;
    let name = deployment.metadata.labels.as_ref()?.get(APP_LABEL)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Build the Registry controller future
///
/// Changes to a managed Deployment (scaling, manual edits) trigger a tick of
/// the owning instance so drift is corrected without waiting for the requeue.
pub fn build_registry_controller(
    client: Client,
    config: OperatorConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let cluster = Arc::new(KubeClusterClient::new(client.clone()));

    let (registries, deployments): (Api<Registry>, Api<Deployment>) =
        match config.watch_namespace.as_deref() {
            Some(ns) => {
                tracing::info!(namespace = %ns, "- Registry controller (namespaced)");
                (
                    Api::namespaced(client.clone(), ns),
                    Api::namespaced(client, ns),
                )
            }
            None => {
                tracing::info!("- Registry controller (all namespaces)");
                (Api::all(client.clone()), Api::all(client))
            }
        };

    let ctx = Arc::new(Context::new(
        cluster.clone(),
        cluster.clone(),
        cluster,
        config,
    ));

    Box::pin(
        Controller::new(
            registries,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .watches(
            deployments,
            WatcherConfig::default()
                .labels(APP_LABEL)
                .timeout(WATCH_TIMEOUT_SECS),
            |deployment| owning_registry(&deployment),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Registry")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
