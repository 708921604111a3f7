//! Injected dependencies shared by the circulation components.

use crate::config::PolicyConfig;
use crate::error::CirculationError;
use crate::events::CirculationEvent;
use crate::metrics;
use crate::store::CirculationStore;
use circulation_core::environment::Clock;
use circulation_core::event_bus::EventBus;
use circulation_core::retry::{RetryPolicy, retry_with_predicate};
use std::future::Future;
use std::sync::Arc;

/// Everything a component needs from the outside world.
///
/// Cheap to clone; every component holds its own copy.
#[derive(Clone)]
pub struct CirculationEnvironment {
    /// Persistent state
    pub store: Arc<dyn CirculationStore>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Post-commit event sink
    pub events: Arc<dyn EventBus<CirculationEvent>>,
    /// Backoff for units of work that lose a version race
    pub retry: RetryPolicy,
    /// System-wide borrowing policy
    pub policy: PolicyConfig,
}

impl CirculationEnvironment {
    /// Creates a new environment
    #[must_use]
    pub fn new(
        store: Arc<dyn CirculationStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventBus<CirculationEvent>>,
        retry: RetryPolicy,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            retry,
            policy,
        }
    }

    /// Run `attempt` until it commits or fails for a reason other than a
    /// version conflict.
    ///
    /// Each attempt must re-read everything it depends on.
    pub(crate) async fn atomically<T, F, Fut>(
        &self,
        operation: &'static str,
        attempt: F,
    ) -> Result<T, CirculationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CirculationError>>,
    {
        retry_with_predicate(&self.retry, attempt, |error: &CirculationError| {
            let conflict = error.is_conflict();
            if conflict {
                metrics::record_commit_conflict(operation);
                tracing::debug!(operation, %error, "Version conflict, retrying from fresh reads");
            }
            conflict
        })
        .await
    }

    /// Publish events for a committed change.
    ///
    /// The change is already durable, so a publish failure is logged and
    /// otherwise ignored.
    pub(crate) async fn publish<I>(&self, events: I)
    where
        I: IntoIterator<Item = CirculationEvent>,
    {
        for event in events {
            let name = event.name();
            if let Err(error) = self.events.publish(event).await {
                tracing::warn!(event = name, %error, "Failed to publish circulation event");
            }
        }
    }
}

impl std::fmt::Debug for CirculationEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CirculationEnvironment")
            .field("retry", &self.retry)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
