//! Environment reconciliation: writes the env cache onto the registry container

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::EnvVar;
use tracing::{debug, info};

use crate::context::LoopContext;
use crate::control::ControlFunction;
use crate::edit;
use crate::status::LoopStatus;

/// Keeps the registry container environment equal to the env cache
///
/// Registered last so every managed variable set during a tick reaches the
/// Deployment in the same tick.
#[derive(Debug, Default)]
pub struct EnvCf {
    deployment_name: Option<String>,
    env_changed: bool,
    unapplied: bool,
    last_deployment_name: Option<String>,
}

impl EnvCf {
    /// Create the function
    pub fn new() -> Self {
        Self::default()
    }
}

fn live_env(ctx: &LoopContext) -> Vec<EnvVar> {
    ctx.resources
        .get::<Deployment>()
        .and_then(|entry| edit::pod_spec(entry.value()))
        .and_then(|pod| edit::app_container(pod, ctx.app_name()))
        .and_then(|container| container.env.clone())
        .unwrap_or_default()
}

#[async_trait]
impl ControlFunction for EnvCf {
    fn describe(&self) -> &'static str {
        "EnvCF"
    }

    async fn sense(&mut self, ctx: &LoopContext, _status: &mut LoopStatus) {
        self.deployment_name = ctx
            .resources
            .get::<Deployment>()
            .map(|entry| entry.name().to_string());
        self.env_changed = ctx.env.is_changed();
        self.unapplied = ctx.env.has_unapplied(&live_env(ctx));
        debug!(
            cf = "EnvCF",
            deployment = ?self.deployment_name,
            changed = self.env_changed,
            unapplied = self.unapplied,
            "sensed"
        );
    }

    fn compare(&self) -> bool {
        self.deployment_name.is_some()
            && (self.env_changed
                || self.unapplied
                || self.deployment_name != self.last_deployment_name)
    }

    fn respond(&mut self, ctx: &mut LoopContext, _status: &mut LoopStatus) {
        let app_name = ctx.app_name().to_string();
        let live = live_env(ctx);

        ctx.env.merge_live(&live);
        let desired = ctx.env.sorted();
        if desired != live {
            info!(cf = "EnvCF", variables = desired.len(), "updating container environment");
            ctx.resources.apply_patch::<Deployment>(move |deployment| {
                let mut next = deployment.clone();
                if let Some(container) = edit::app_container_mut(edit::pod_spec_mut(&mut next), &app_name) {
                    container.env = Some(desired.clone());
                }
                next
            });
        }

        ctx.env.reset_changed();
        self.last_deployment_name = self.deployment_name.clone();
    }
}
