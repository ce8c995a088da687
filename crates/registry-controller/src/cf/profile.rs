//! Default application profile

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use tracing::info;

use crate::context::LoopContext;
use crate::control::ControlFunction;
use crate::edit;
use crate::env::EnvCacheEntry;
use crate::status::LoopStatus;

/// Variable selecting the application profile
pub const QUARKUS_PROFILE: &str = "QUARKUS_PROFILE";

/// Profile used when none is set
pub const DEFAULT_PROFILE: &str = "prod";

/// Sets the application profile to `prod` unless one is already set
#[derive(Debug, Default)]
pub struct ProfileCf {
    profile_exists: bool,
}

impl ProfileCf {
    /// Create the function
    pub fn new() -> Self {
        Self::default()
    }
}

/// Whether the variable is set on the live registry container
///
/// The env cache only captures the live environment when the env function
/// runs, so on the first tick a user-provided value is only visible here.
fn live_env_contains(ctx: &LoopContext, name: &str) -> bool {
    ctx.resources
        .get::<Deployment>()
        .and_then(|entry| edit::pod_spec(entry.value()))
        .and_then(|pod| edit::app_container(pod, ctx.app_name()))
        .and_then(|container| container.env.as_ref())
        .is_some_and(|env| env.iter().any(|var| var.name == name))
}

#[async_trait]
impl ControlFunction for ProfileCf {
    fn describe(&self) -> &'static str {
        "ProfileCF"
    }

    async fn sense(&mut self, ctx: &LoopContext, _status: &mut LoopStatus) {
        self.profile_exists =
            ctx.env.get(QUARKUS_PROFILE).is_some() || live_env_contains(ctx, QUARKUS_PROFILE);
    }

    fn compare(&self) -> bool {
        !self.profile_exists
    }

    fn respond(&mut self, ctx: &mut LoopContext, _status: &mut LoopStatus) {
        info!(cf = "ProfileCF", profile = DEFAULT_PROFILE, "setting default profile");
        ctx.env
            .set(EnvCacheEntry::managed(QUARKUS_PROFILE, DEFAULT_PROFILE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, EnvVar};
    use registry_common::crd::RegistrySpec;

    #[tokio::test]
    async fn absent_profile_defaults_to_prod() {
        let mut ctx = LoopContext::for_testing(RegistrySpec::default());
        let mut status = LoopStatus::default();
        let mut cf = ProfileCf::new();

        cf.sense(&ctx, &mut status).await;
        assert!(cf.compare());
        cf.respond(&mut ctx, &mut status);

        let entry = ctx.env.get(QUARKUS_PROFILE).unwrap();
        assert_eq!(entry.value(), Some("prod"));
        assert!(entry.is_managed());
        assert!(ctx.env.is_changed());

        cf.sense(&ctx, &mut status).await;
        assert!(!cf.compare());
    }

    #[tokio::test]
    async fn user_profile_on_the_live_container_is_kept() {
        let mut ctx = LoopContext::for_testing(RegistrySpec::default());
        let mut deployment = Deployment::default();
        edit::pod_spec_mut(&mut deployment).containers.push(Container {
            name: "registry".to_string(),
            env: Some(vec![EnvVar {
                name: QUARKUS_PROFILE.to_string(),
                value: Some("dev".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        });
        ctx.resources.set("registry", deployment);
        let mut status = LoopStatus::default();
        let mut cf = ProfileCf::new();

        cf.sense(&ctx, &mut status).await;
        assert!(!cf.compare());
    }
}
