//! Control function contract and the loop that drives it
//!
//! Every tick runs Sense, then Compare, then Respond when Compare says the
//! observed state diverges, for each registered function in registration
//! order. Functions only communicate through the caches in [`LoopContext`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::context::LoopContext;
use crate::status::LoopStatus;

/// One independent reconciliation unit
#[async_trait]
pub trait ControlFunction: Send {
    /// Stable name used in logs and spans
    fn describe(&self) -> &'static str;

    /// Observe the caches and the spec; absent entries mean "not yet created"
    async fn sense(&mut self, ctx: &LoopContext, status: &mut LoopStatus);

    /// Whether the sensed state diverges from the desired state
    fn compare(&self) -> bool;

    /// Queue corrective patches and cache updates
    fn respond(&mut self, ctx: &mut LoopContext, status: &mut LoopStatus);

    /// Release external side effects on finalization; true once clean
    fn cleanup(&mut self) -> bool {
        true
    }
}

/// Result of one tick
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickOutcome {
    /// Functions whose Respond ran, in order
    pub responded: Vec<&'static str>,
    /// Delay requested before the next tick
    pub requeue_delay: Option<Duration>,
}

impl TickOutcome {
    /// Whether every function found its state converged
    pub fn is_converged(&self) -> bool {
        self.responded.is_empty()
    }
}

/// Ordered set of control functions bound to one instance's caches
pub struct ControlLoop {
    functions: Vec<Box<dyn ControlFunction>>,
    context: LoopContext,
    status: LoopStatus,
    finalized: bool,
}

impl ControlLoop {
    /// Create an empty loop over the given context
    pub fn new(context: LoopContext) -> Self {
        Self {
            functions: Vec::new(),
            context,
            status: LoopStatus::default(),
            finalized: false,
        }
    }

    /// Append a control function; it runs after every function registered before it
    pub fn register(&mut self, function: impl ControlFunction + 'static) -> &mut Self {
        self.functions.push(Box::new(function));
        self
    }

    /// Names of the registered functions, in order
    pub fn functions(&self) -> Vec<&'static str> {
        self.functions.iter().map(|f| f.describe()).collect()
    }

    /// Caches of the instance
    pub fn context(&self) -> &LoopContext {
        &self.context
    }

    /// Mutable caches, for refreshing snapshots and flushing
    pub fn context_mut(&mut self) -> &mut LoopContext {
        &mut self.context
    }

    /// Status raised by the last tick
    pub fn status(&self) -> &LoopStatus {
        &self.status
    }

    /// Whether the instance has been finalized
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Run one tick over every registered function
    #[instrument(skip(self), fields(app = %self.context.app_name()))]
    pub async fn tick(&mut self) -> TickOutcome {
        if self.finalized {
            warn!("tick requested after finalization, ignoring");
            return TickOutcome::default();
        }

        self.context.resources.discard_pending();
        self.status.reset();

        let mut outcome = TickOutcome::default();
        for function in self.functions.iter_mut() {
            let cf = function.describe();
            function.sense(&self.context, &mut self.status).await;
            if function.compare() {
                debug!(cf, "state diverges, responding");
                function.respond(&mut self.context, &mut self.status);
                outcome.responded.push(cf);
            } else {
                debug!(cf, "state converged");
            }
        }

        outcome.requeue_delay = self.status.requeue_delay();
        if !outcome.responded.is_empty() {
            info!(responded = ?outcome.responded, pending = ?self.context.resources.pending(), "tick queued changes");
        }
        outcome
    }

    /// Finalize the instance: run every cleanup and drop queued patches
    ///
    /// Returns true once every function reports its side effects are gone.
    /// After this only `finalize` may be called again.
    pub fn finalize(&mut self) -> bool {
        self.finalized = true;
        self.context.resources.discard_pending();
        let mut clean = true;
        for function in self.functions.iter_mut() {
            if !function.cleanup() {
                warn!(cf = function.describe(), "cleanup incomplete");
                clean = false;
            }
        }
        clean
    }
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("functions", &self.functions())
            .field("context", &self.context)
            .field("finalized", &self.finalized)
            .finish()
    }
}
