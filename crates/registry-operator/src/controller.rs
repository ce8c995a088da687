//! Registry controller - hosts one control loop per Registry instance
//!
//! Each reconcile refreshes the instance's resource cache from the API server,
//! runs one tick, flushes the composed patches and publishes the conditions.
//! Ticks of one instance are serialized by its session lock; different
//! instances reconcile concurrently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use registry_common::crd::{Registry, RegistryStatus};
use registry_common::Error;
use registry_controller::{build_loop, flush, ControlLoop, ResourceCache, ResourceWriter, SecretClient};

use crate::config::OperatorConfig;

/// Finalizer guarding the teardown of an instance's session
pub const FINALIZER: &str = "registry.dev/finalizer";

/// Delay before re-checking an instance whose tick wrote changes
const RECHECK_AFTER_WRITE: Duration = Duration::from_secs(5);

/// Requeue used right after adding the finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

// =============================================================================
// Cluster access
// =============================================================================

/// Kubernetes operations of the reconciler beyond the control loop's own
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryKubeClient: Send + Sync {
    /// Load the last committed snapshot of every managed kind
    async fn refresh(&self, registry: &Registry, resources: &mut ResourceCache) -> Result<(), Error>;

    /// Patch the status subresource of a Registry
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &RegistryStatus,
    ) -> Result<(), Error>;

    /// Add the operator finalizer
    async fn add_finalizer(&self, registry: &Registry) -> Result<(), Error>;

    /// Remove the operator finalizer
    async fn remove_finalizer(&self, registry: &Registry) -> Result<(), Error>;
}

// =============================================================================
// Controller context
// =============================================================================

/// Per-instance control loop, locked for the duration of a tick
pub type Session = Arc<Mutex<ControlLoop>>;

/// Shared context for the Registry controller
pub struct Context {
    /// Refresh, status and finalizer operations
    pub kube: Arc<dyn RegistryKubeClient>,
    /// Secret reads for the HTTPS function
    pub secrets: Arc<dyn SecretClient>,
    /// Writes of composed patches
    pub writer: Arc<dyn ResourceWriter>,
    /// Runtime settings
    pub config: OperatorConfig,
    sessions: DashMap<String, Session>,
}

impl Context {
    /// Create a context with no sessions
    pub fn new(
        kube: Arc<dyn RegistryKubeClient>,
        secrets: Arc<dyn SecretClient>,
        writer: Arc<dyn ResourceWriter>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            kube,
            secrets,
            writer,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Session of an instance, created on first use
    fn session(&self, name: &str, namespace: &str) -> Session {
        self.sessions
            .entry(session_key(name, namespace))
            .or_insert_with(|| {
                info!(registry = %name, %namespace, "starting control loop");
                Arc::new(Mutex::new(build_loop(name, namespace, self.secrets.clone())))
            })
            .value()
            .clone()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn session_key(name: &str, namespace: &str) -> String {
    format!("{namespace}/{name}")
}

fn has_finalizer(registry: &Registry) -> bool {
    registry.finalizers().iter().any(|f| f == FINALIZER)
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile a Registry: one tick of its control loop
#[instrument(skip(registry, ctx), fields(registry = %registry.name_any()))]
pub async fn reconcile(registry: Arc<Registry>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = registry.name_any();
    let namespace = registry
        .namespace()
        .ok_or_else(|| Error::configuration("Registry is missing a namespace"))?;

    if registry.metadata.deletion_timestamp.is_some() {
        return finalize(&registry, &name, &namespace, &ctx).await;
    }

    if !has_finalizer(&registry) {
        info!("adding finalizer");
        ctx.kube.add_finalizer(&registry).await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let session = ctx.session(&name, &namespace);
    let mut control = session.lock().await;

    let resources = &mut control.context_mut().resources;
    resources.set(name.clone(), registry.as_ref().clone());
    ctx.kube.refresh(&registry, resources).await?;

    let outcome = control.tick().await;
    let written = flush(
        &mut control.context_mut().resources,
        &namespace,
        ctx.writer.as_ref(),
    )
    .await?;

    let previous = registry
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    let status = RegistryStatus {
        observed_generation: registry.metadata.generation,
        conditions: control.status().conditions().render(previous),
    };
    if registry.status.as_ref() != Some(&status) {
        ctx.kube.patch_status(&name, &namespace, &status).await?;
    }

    let next = match outcome.requeue_delay {
        Some(delay) => delay,
        None if written > 0 => RECHECK_AFTER_WRITE,
        None => ctx.config.default_requeue(),
    };
    debug!(responded = ?outcome.responded, written, ?next, "tick complete");
    Ok(Action::requeue(next))
}

async fn finalize(
    registry: &Registry,
    name: &str,
    namespace: &str,
    ctx: &Context,
) -> Result<Action, Error> {
    if let Some(session) = ctx.sessions.get(&session_key(name, namespace)).map(|s| s.value().clone()) {
        let clean = session.lock().await.finalize();
        if !clean {
            warn!("cleanup incomplete, retrying");
            return Ok(Action::requeue(ctx.config.error_requeue()));
        }
        ctx.sessions.remove(&session_key(name, namespace));
    }

    if has_finalizer(registry) {
        info!("instance finalized, removing finalizer");
        ctx.kube.remove_finalizer(registry).await?;
    }
    Ok(Action::await_change())
}

/// Error policy for the Registry controller
pub fn error_policy(registry: Arc<Registry>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        registry = %registry.name_any(),
        retryable = error.is_retryable(),
        "registry reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(ctx.config.error_requeue())
    } else {
        Action::requeue(ctx.config.default_requeue())
    }
}
