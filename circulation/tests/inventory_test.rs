//! Inventory ledger tests.
//!
//! Direct copy adjustments: taking the last copy, releasing onto a full
//! shelf, and racing for one copy.
//!
//! Run with: `cargo test --test inventory_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use circulation::error::CirculationError;
use circulation::types::TitleId;
use common::Desk;

/// Once the shelf is empty, taking another copy is refused.
#[tokio::test]
async fn test_reserve_copy_on_empty_shelf() {
    let desk = Desk::new();
    let title = desk.title("Dune", 1);

    let taken = desk.circulation.inventory.reserve_copy(title).await.unwrap();
    assert_eq!(taken.available_copies, 0);

    let result = desk.circulation.inventory.reserve_copy(title).await;
    assert!(matches!(
        result,
        Err(CirculationError::CapacityExceeded { title_id }) if title_id == title
    ));
    assert_eq!(desk.available(title).await, 0);
    assert_eq!(desk.events_named("StockAdjusted").len(), 1);
}

/// Releasing onto a full shelf is refused and the counters stay put.
#[tokio::test]
async fn test_release_copy_on_full_shelf() {
    let desk = Desk::new();
    let title = desk.title("Dune", 2);

    let result = desk.circulation.inventory.release_copy(title).await;
    assert!(matches!(result, Err(CirculationError::Validation(_))));

    let stock = desk.circulation.inventory.availability(title).await.unwrap();
    assert_eq!(stock.available_copies, 2);
    assert_eq!(stock.total_copies, 2);
    assert!(desk.events_named("StockAdjusted").is_empty());
}

/// A taken copy can be put back.
#[tokio::test]
async fn test_reserve_then_release() {
    let desk = Desk::new();
    let title = desk.title("Dune", 2);

    desk.circulation.inventory.reserve_copy(title).await.unwrap();
    let released = desk.circulation.inventory.release_copy(title).await.unwrap();

    assert_eq!(released.available_copies, 2);
    assert_eq!(desk.events_named("StockAdjusted").len(), 2);
}

/// Unknown titles have no stock to adjust.
#[tokio::test]
async fn test_adjust_unknown_title() {
    let desk = Desk::new();

    let reserve = desk.circulation.inventory.reserve_copy(TitleId::new()).await;
    assert!(matches!(reserve, Err(CirculationError::NotFound { .. })));
    let release = desk.circulation.inventory.release_copy(TitleId::new()).await;
    assert!(matches!(release, Err(CirculationError::NotFound { .. })));
}

/// Ten callers racing for the last copy: exactly one gets it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_copy_reserved_once() {
    let desk = Desk::new();
    let title = desk.title("Dune", 1);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let inventory = desk.circulation.inventory.clone();
            tokio::spawn(async move { inventory.reserve_copy(title).await })
        })
        .collect();

    let mut taken = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => taken += 1,
            Err(error) => assert!(
                matches!(error, CirculationError::CapacityExceeded { .. }),
                "unexpected error: {error}"
            ),
        }
    }

    assert_eq!(taken, 1);
    assert_eq!(desk.available(title).await, 0);
}
