//! Operator configuration from flags and environment

use std::time::Duration;

use clap::Args;

/// Runtime settings of the controller
#[derive(Args, Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Only watch Registry objects in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Seconds between ticks of a converged instance
    #[arg(long, env = "DEFAULT_REQUEUE_SECS", default_value_t = 60)]
    pub default_requeue_secs: u64,

    /// Seconds before retrying a tick that failed
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            default_requeue_secs: 60,
            error_requeue_secs: 30,
        }
    }
}

impl OperatorConfig {
    /// Delay between ticks of a converged instance
    pub fn default_requeue(&self) -> Duration {
        Duration::from_secs(self.default_requeue_secs)
    }

    /// Delay before retrying a failed tick
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}
