//! Per-tick status: conditions raised by control functions and the requeue hint

use std::collections::BTreeMap;
use std::time::Duration;

use registry_common::crd::{Condition, ConditionStatus};

/// Condition type reporting an invalid declared configuration
pub const CONFIGURATION_ERROR: &str = "ConfigurationError";

/// Condition type reporting overall readiness
pub const READY: &str = "Ready";

/// Conditions raised during one tick
#[derive(Clone, Debug, Default)]
pub struct ConditionManager {
    conditions: BTreeMap<String, Condition>,
}

impl ConditionManager {
    /// Mark the configuration as invalid at `field_path`
    pub fn transition_invalid(&mut self, value: &str, field_path: &str) {
        self.put(Condition::new(
            CONFIGURATION_ERROR,
            ConditionStatus::True,
            "InvalidConfiguration",
            format!("invalid value {value:?} at {field_path}"),
        ));
    }

    /// Mark the instance as not ready because of an error
    pub fn transition_error(&mut self) {
        self.put(Condition::new(
            READY,
            ConditionStatus::False,
            "Error",
            "reconciliation reported an error",
        ));
    }

    /// Condition of the given type, if raised
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.conditions.get(type_)
    }

    /// Whether anything marked the configuration invalid this tick
    pub fn has_configuration_error(&self) -> bool {
        self.get(CONFIGURATION_ERROR)
            .is_some_and(Condition::is_true)
    }

    /// Final condition set for the status subresource
    ///
    /// Conditions nobody raised this tick resolve to their healthy state.
    /// Timestamps of conditions whose state didn't change are carried over
    /// from `previous` so the status only moves on real transitions.
    pub fn render(&self, previous: &[Condition]) -> Vec<Condition> {
        let mut conditions = self.conditions.clone();
        conditions.entry(CONFIGURATION_ERROR.to_string()).or_insert_with(|| {
            Condition::new(
                CONFIGURATION_ERROR,
                ConditionStatus::False,
                "Valid",
                "configuration is valid",
            )
        });
        conditions.entry(READY.to_string()).or_insert_with(|| {
            Condition::new(READY, ConditionStatus::True, "Reconciled", "all control functions ran")
        });

        conditions
            .into_values()
            .map(|mut condition| {
                if let Some(old) = previous.iter().find(|old| old.same_state(&condition)) {
                    condition.last_transition_time = old.last_transition_time;
                }
                condition
            })
            .collect()
    }

    fn put(&mut self, condition: Condition) {
        self.conditions.insert(condition.type_.clone(), condition);
    }
}

/// Status side-channel of one tick
#[derive(Clone, Debug, Default)]
pub struct LoopStatus {
    conditions: ConditionManager,
    requeue_delay: Option<Duration>,
}

impl LoopStatus {
    /// Conditions raised so far
    pub fn conditions(&self) -> &ConditionManager {
        &self.conditions
    }

    /// Raise conditions
    pub fn conditions_mut(&mut self) -> &mut ConditionManager {
        &mut self.conditions
    }

    /// Ask the scheduler to run the next tick no earlier than `secs` from now
    ///
    /// The longest requested delay wins.
    pub fn set_requeue_delay_sec(&mut self, secs: u64) {
        let delay = Duration::from_secs(secs);
        if self.requeue_delay.is_none_or(|current| delay > current) {
            self.requeue_delay = Some(delay);
        }
    }

    /// Requested delay, if any function asked for one
    pub fn requeue_delay(&self) -> Option<Duration> {
        self.requeue_delay
    }

    /// Forget everything raised by the previous tick
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
