//! Circulation desk demo.
//!
//! Seeds an in-memory catalog, walks a member through request, approval,
//! reservation and return, then (if enabled) keeps the daily jobs running until
//! Ctrl+C.
//!
//! Run with: `cargo run -p circulation`

use anyhow::Context;
use circulation::app::Circulation;
use circulation::config::Config;
use circulation::events::CirculationEvent;
use circulation::notifications::TracingNotifier;
use circulation::store::InMemoryStore;
use circulation::types::{Member, MemberId, MembershipPlan, Money, PlanId, Title, TitleId};
use circulation_core::environment::SystemClock;
use circulation_core::event_bus::{BroadcastEventBus, EventBus};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    circulation::metrics::register_business_metrics();
    tracing::info!(?config.policy, "Starting circulation desk");

    // Catalog
    let store = Arc::new(InMemoryStore::new());
    let premium = MembershipPlan {
        id: PlanId::new(),
        name: "Premium".to_string(),
        borrow_days: 21,
        renewal_days: 14,
        fine_per_day: Some(Money::units(5)),
    };
    store.upsert_plan(premium.clone());

    let asha = Member::new(MemberId::new(), "Asha", Some(premium.id));
    let ravi = Member::new(MemberId::new(), "Ravi", None);
    let dune = Title::new(TitleId::new(), "Dune", 1);
    store.insert_member(asha.clone()).context("seeding members")?;
    store.insert_member(ravi.clone()).context("seeding members")?;
    store.insert_title(dune.clone()).context("seeding titles")?;

    let events: Arc<dyn EventBus<CirculationEvent>> =
        Arc::new(BroadcastEventBus::new(config.events.capacity));
    let circulation = Circulation::new(&config, store, Arc::new(SystemClock), events);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let dispatcher = circulation.start_notifications(Arc::new(TracingNotifier), &shutdown_tx);

    // Asha borrows the only copy; Ravi joins the queue.
    let request = circulation.borrowing.submit_request(asha.id, dune.id).await?;
    let loan = circulation.borrowing.approve(request.id).await?;
    let reservation = circulation.reservations.reserve(ravi.id, dune.id).await?;
    tracing::info!(
        loan = %loan.id,
        reservation = %reservation.id,
        queue = circulation.reservations.queue_length(dune.id).await?,
        "Copy out, one member waiting"
    );

    let renewed = circulation.borrowing.renew(loan.id).await?;
    tracing::info!(due_at = %renewed.due_at, "Loan renewed");

    // The return hands the copy straight to Ravi.
    let outcome = circulation.borrowing.return_book(loan.id, None).await?;
    if let Some(allocation) = &outcome.allocation {
        tracing::info!(
            member = %allocation.record.member_id,
            due_at = %allocation.record.due_at,
            "Returned copy allocated from the queue"
        );
    }

    let stock = circulation.inventory.availability(dune.id).await?;
    tracing::info!(
        available = stock.available_copies,
        total = stock.total_copies,
        "Stock after return"
    );

    let report = circulation.fines.process_overdue_sweep().await?;
    tracing::info!(report = %serde_json::to_string(&report)?, "Sweep report");

    let tasks = if config.scheduler.enabled {
        let tasks = circulation.scheduler().spawn(&shutdown_tx);
        tracing::info!("Daily jobs running; press Ctrl+C to stop");
        tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
        tasks
    } else {
        Vec::new()
    };

    let _ = shutdown_tx.send(());
    for task in tasks {
        let _ = task.await;
    }
    let stats = dispatcher.await.context("notification dispatcher panicked")?;
    tracing::info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "Circulation desk stopped"
    );
    Ok(())
}
