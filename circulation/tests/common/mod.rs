//! Shared fixtures for the circulation integration tests.

#![allow(dead_code)]
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use circulation::app::Circulation;
use circulation::config::Config;
use circulation::events::CirculationEvent;
use circulation::store::{CirculationStore, InMemoryStore};
use circulation::types::{
    BorrowRecord, Member, MemberId, MembershipPlan, Money, PlanId, RecordId, Title, TitleId,
};
use circulation_core::environment::Clock;
use circulation_core::retry::RetryPolicy;
use circulation_testing::{ManualClock, RecordingEventBus, init_test_tracing, test_clock};
use std::sync::Arc;

/// A circulation desk over an in-memory store, a manual clock and a
/// recording event bus.
pub struct Desk {
    pub circulation: Circulation,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub bus: Arc<RecordingEventBus<CirculationEvent>>,
}

/// Config with generous retries so contention tests never run out.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.concurrency.retry = RetryPolicy::builder()
        .max_retries(64)
        .initial_delay(std::time::Duration::from_millis(1))
        .max_delay(std::time::Duration::from_millis(4))
        .build();
    config
}

impl Desk {
    pub fn new() -> Self {
        Self::with_config(&test_config())
    }

    pub fn with_config(config: &Config) -> Self {
        init_test_tracing();
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let bus = Arc::new(RecordingEventBus::new());
        let circulation = Circulation::new(config, store.clone(), clock.clone(), bus.clone());
        Self {
            circulation,
            store,
            clock,
            bus,
        }
    }

    pub fn member(&self, name: &str) -> MemberId {
        let member = Member::new(MemberId::new(), name, None);
        self.store.insert_member(member.clone()).unwrap();
        member.id
    }

    pub fn member_on_plan(&self, name: &str, plan: &MembershipPlan) -> MemberId {
        self.store.upsert_plan(plan.clone());
        let member = Member::new(MemberId::new(), name, Some(plan.id));
        self.store.insert_member(member.clone()).unwrap();
        member.id
    }

    pub fn title(&self, name: &str, copies: u32) -> TitleId {
        let title = Title::new(TitleId::new(), name, copies);
        self.store.insert_title(title.clone()).unwrap();
        title.id
    }

    /// Submit and approve in one go.
    pub async fn lend(&self, member_id: MemberId, title_id: TitleId) -> BorrowRecord {
        let request = self
            .circulation
            .borrowing
            .submit_request(member_id, title_id)
            .await
            .unwrap();
        self.circulation.borrowing.approve(request.id).await.unwrap()
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }

    pub async fn available(&self, title_id: TitleId) -> u32 {
        self.circulation
            .inventory
            .availability(title_id)
            .await
            .unwrap()
            .available_copies
    }

    /// The record as currently stored.
    pub async fn record(&self, id: RecordId) -> BorrowRecord {
        self.store.record(id).await.unwrap().unwrap().into_inner()
    }

    /// Events of one kind, in publish order.
    pub fn events_named(&self, name: &str) -> Vec<CirculationEvent> {
        self.bus
            .published()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }
}

pub fn premium_plan() -> MembershipPlan {
    MembershipPlan {
        id: PlanId::new(),
        name: "Premium".to_string(),
        borrow_days: 21,
        renewal_days: 14,
        fine_per_day: Some(Money::units(5)),
    }
}
