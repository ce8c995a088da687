//! Application log level taken from the declared configuration

use async_trait::async_trait;
use tracing::{debug, info};

use crate::context::LoopContext;
use crate::control::ControlFunction;
use crate::env::EnvCacheEntry;
use crate::status::LoopStatus;

/// Variable carrying the application log level
pub const LOG_LEVEL: &str = "LOG_LEVEL";

/// Writes `spec.configuration.logLevel` into the environment
#[derive(Debug, Default)]
pub struct LogLevelCf {
    declared: Option<String>,
    current: Option<EnvCacheEntry>,
}

impl LogLevelCf {
    /// Create the function
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ControlFunction for LogLevelCf {
    fn describe(&self) -> &'static str {
        "LogLevelCF"
    }

    async fn sense(&mut self, ctx: &LoopContext, _status: &mut LoopStatus) {
        self.declared = ctx
            .spec()
            .and_then(|spec| spec.log_level())
            .map(str::to_string);
        self.current = ctx.env.get(LOG_LEVEL).cloned();
        debug!(cf = "LogLevelCF", declared = ?self.declared, "sensed");
    }

    fn compare(&self) -> bool {
        let Some(declared) = &self.declared else {
            return false;
        };
        match &self.current {
            Some(entry) => !entry.is_managed() || entry.value() != Some(declared.as_str()),
            None => true,
        }
    }

    fn respond(&mut self, ctx: &mut LoopContext, _status: &mut LoopStatus) {
        if let Some(level) = &self.declared {
            info!(cf = "LogLevelCF", level = %level, "setting log level");
            ctx.env.set(EnvCacheEntry::managed(LOG_LEVEL, level.as_str()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::EnvVar;
    use registry_common::crd::RegistrySpec;

    fn spec(level: Option<&str>) -> RegistrySpec {
        let mut spec = RegistrySpec::default();
        spec.configuration.log_level = level.map(str::to_string);
        spec
    }

    #[tokio::test]
    async fn declared_level_overrides_a_user_value() {
        let mut ctx = LoopContext::for_testing(spec(Some("DEBUG")));
        ctx.env.merge_live(&[EnvVar {
            name: LOG_LEVEL.to_string(),
            value: Some("WARN".to_string()),
            ..Default::default()
        }]);
        let mut status = LoopStatus::default();
        let mut cf = LogLevelCf::new();

        cf.sense(&ctx, &mut status).await;
        assert!(cf.compare());
        cf.respond(&mut ctx, &mut status);

        let entry = ctx.env.get(LOG_LEVEL).unwrap();
        assert_eq!(entry.value(), Some("DEBUG"));
        assert!(entry.is_managed());

        cf.sense(&ctx, &mut status).await;
        assert!(!cf.compare());
    }

    #[tokio::test]
    async fn undeclared_level_leaves_the_environment_alone() {
        let ctx = LoopContext::for_testing(spec(None));
        let mut status = LoopStatus::default();
        let mut cf = LogLevelCf::new();

        cf.sense(&ctx, &mut status).await;
        assert!(!cf.compare());
    }
}
