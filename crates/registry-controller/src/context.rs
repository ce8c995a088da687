//! Per-instance state shared by the control functions of one loop

use crate::env::EnvCache;
use crate::resources::ResourceCache;
use registry_common::crd::{Registry, RegistrySpec};

/// Caches of one managed instance
///
/// Control functions never talk to each other directly; everything one
/// function leaves for the next goes through these two caches.
#[derive(Debug)]
pub struct LoopContext {
    app_name: String,
    app_namespace: String,
    /// Last committed snapshot of every managed object
    pub resources: ResourceCache,
    /// Ordered environment of the registry container
    pub env: EnvCache,
}

impl LoopContext {
    /// Create the context of one instance with empty caches
    pub fn new(app_name: impl Into<String>, app_namespace: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_namespace: app_namespace.into(),
            resources: ResourceCache::new(),
            env: EnvCache::new(),
        }
    }

    /// Name of the managed instance
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Namespace of the managed instance
    pub fn app_namespace(&self) -> &str {
        &self.app_namespace
    }

    /// Declared spec, once the Registry object has been cached
    pub fn spec(&self) -> Option<&RegistrySpec> {
        self.resources.get::<Registry>().map(|entry| &entry.value().spec)
    }

    /// Context seeded with a spec, for tests
    #[cfg(test)]
    pub(crate) fn for_testing(spec: RegistrySpec) -> Self {
        let mut ctx = Self::new("registry", "default");
        ctx.resources.set("registry", Registry::new("registry", spec));
        ctx
    }
}
