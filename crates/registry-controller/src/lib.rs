//! Reconciliation core of the registry operator
//!
//! A [`ControlLoop`] owns the caches of one managed instance and runs its
//! control functions once per tick:
//!
//! 1. [`HttpsCf`] converges the HTTPS and HTTP facets
//! 2. [`LabelsCf`] keeps the canonical labels on every object
//! 3. [`LogLevelCf`] applies the declared log level
//! 4. [`ProfileCf`] sets the default profile
//! 5. [`EnvCf`] writes the env cache onto the container
//!
//! Patches queued during a tick are written back by [`flush`].

#![deny(missing_docs)]

pub mod cf;
pub mod client;
pub mod context;
pub mod control;
pub mod edit;
pub mod env;
pub mod flush;
pub mod launch_options;
pub mod resources;
pub mod status;

use std::sync::Arc;

pub use cf::{EnvCf, HttpsCf, LabelsCf, LogLevelCf, ProfileCf};
pub use client::{ResourceWriter, SecretClient};
pub use context::LoopContext;
pub use control::{ControlFunction, ControlLoop, TickOutcome};
pub use env::{EnvCache, EnvCacheEntry};
pub use flush::flush;
pub use resources::{Cached, CacheEntry, LegacyPodDisruptionBudget, ResourceCache, ResourceKey};
pub use status::{ConditionManager, LoopStatus};

/// Build the control loop of one instance with every function registered
pub fn build_loop(
    app_name: impl Into<String>,
    app_namespace: impl Into<String>,
    secrets: Arc<dyn SecretClient>,
) -> ControlLoop {
    let mut control = ControlLoop::new(LoopContext::new(app_name, app_namespace));
    control
        .register(HttpsCf::new(secrets))
        .register(LabelsCf::new())
        .register(LogLevelCf::new())
        .register(ProfileCf::new())
        .register(EnvCf::new());
    control
}
