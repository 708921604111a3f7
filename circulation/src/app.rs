//! Wiring: builds every circulation component over one shared environment.

use crate::borrow::BorrowWorkflow;
use crate::config::Config;
use crate::environment::CirculationEnvironment;
use crate::events::CirculationEvent;
use crate::fines::FineEngine;
use crate::inventory::InventoryLedger;
use crate::notifications::{NotificationDispatcher, Notifier};
use crate::plans::PlanResolver;
use crate::reservations::ReservationQueue;
use crate::scheduler::SweepScheduler;
use crate::store::CirculationStore;
use circulation_core::environment::Clock;
use circulation_core::event_bus::EventBus;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The circulation core, ready to serve.
///
/// # Example
///
/// ```
/// use circulation::app::Circulation;
/// use circulation::config::Config;
/// use circulation::store::InMemoryStore;
/// use circulation::types::{Member, MemberId, Title, TitleId};
/// use circulation_core::environment::SystemClock;
/// use circulation_core::event_bus::BroadcastEventBus;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(InMemoryStore::new());
/// let member = Member::new(MemberId::new(), "Asha", None);
/// let title = Title::new(TitleId::new(), "Dune", 1);
/// store.insert_member(member.clone())?;
/// store.insert_title(title.clone())?;
///
/// let circulation = Circulation::new(
///     &Config::default(),
///     store,
///     Arc::new(SystemClock),
///     Arc::new(BroadcastEventBus::new(64)),
/// );
///
/// let request = circulation.borrowing.submit_request(member.id, title.id).await?;
/// let loan = circulation.borrowing.approve(request.id).await?;
/// assert_eq!(loan.member_id, member.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Circulation {
    /// Copy counters
    pub inventory: InventoryLedger,
    /// Plan lookup
    pub plans: PlanResolver,
    /// Requests and loans
    pub borrowing: BorrowWorkflow,
    /// Fines and daily jobs
    pub fines: FineEngine,
    /// Waitlists
    pub reservations: ReservationQueue,
    env: CirculationEnvironment,
    config: Config,
}

impl Circulation {
    /// Build every component over the given store, clock and bus.
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<dyn CirculationStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventBus<CirculationEvent>>,
    ) -> Self {
        let env = CirculationEnvironment::new(
            store,
            clock,
            events,
            config.concurrency.retry.clone(),
            config.policy.clone(),
        );
        Self {
            inventory: InventoryLedger::new(env.clone()),
            plans: PlanResolver::new(env.clone()),
            borrowing: BorrowWorkflow::new(env.clone()),
            fines: FineEngine::new(env.clone()),
            reservations: ReservationQueue::new(env.clone()),
            env,
            config: config.clone(),
        }
    }

    /// Shared environment.
    #[must_use]
    pub const fn environment(&self) -> &CirculationEnvironment {
        &self.env
    }

    /// Scheduler for the daily jobs, using the configured hours.
    #[must_use]
    pub fn scheduler(&self) -> SweepScheduler {
        SweepScheduler::new(
            self.fines.clone(),
            Arc::clone(&self.env.clock),
            self.config.scheduler.clone(),
        )
    }

    /// Subscribe a dispatcher to the event bus and start it.
    #[must_use]
    pub fn start_notifications(
        &self,
        notifier: Arc<dyn Notifier>,
        shutdown: &broadcast::Sender<()>,
    ) -> JoinHandle<crate::notifications::DispatchStats> {
        let events = self.env.events.subscribe();
        NotificationDispatcher::new(notifier).spawn(events, shutdown.subscribe())
    }
}
