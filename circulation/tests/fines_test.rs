//! Fine engine tests.
//!
//! Overdue sweep idempotence, waivers, offline payments, reminders and the
//! overdue and unpaid-fine views.
//!
//! Run with: `cargo test --test fines_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use circulation::error::CirculationError;
use circulation::events::CirculationEvent;
use circulation::types::{FineSettlement, LoanStatus, MemberId, Money, RecordId, ReturnCondition};
use common::{Desk, premium_plan};

/// The sweep tags a late loan once; a second run the same day changes nothing.
#[tokio::test]
async fn test_sweep_marks_overdue_once() {
    let desk = Desk::new();
    let member = desk.member("Asha");
    let title = desk.title("Dune", 1);
    let record = desk.lend(member, title).await;

    desk.advance_days(15);
    let first = desk.circulation.fines.process_overdue_sweep().await.unwrap();
    assert_eq!(first.scanned, 1);
    assert_eq!(first.marked_overdue, 1);

    let second = desk.circulation.fines.process_overdue_sweep().await.unwrap();
    assert_eq!(second.marked_overdue, 0);
    assert_eq!(second.refreshed, 0);

    let stored = desk.record(record.id).await;
    assert_eq!(stored.status, LoanStatus::Overdue);
    assert_eq!(stored.fine, Money::units(10), "fine must not be counted twice");
    assert_eq!(desk.events_named("LoanOverdue").len(), 1);
}

/// A later sweep refreshes the cached fine without a second overdue event.
#[tokio::test]
async fn test_sweep_refreshes_fine_next_day() {
    let desk = Desk::new();
    let member = desk.member("Asha");
    let title = desk.title("Dune", 1);
    let record = desk.lend(member, title).await;

    desk.advance_days(15);
    desk.circulation.fines.process_overdue_sweep().await.unwrap();
    desk.advance_days(1);
    let report = desk.circulation.fines.process_overdue_sweep().await.unwrap();

    assert_eq!(report.marked_overdue, 0);
    assert_eq!(report.refreshed, 1);
    assert_eq!(desk.record(record.id).await.fine, Money::units(20));
    assert_eq!(desk.events_named("LoanOverdue").len(), 1);
}

/// Loans within their period and closed loans are left alone.
#[tokio::test]
async fn test_sweep_ignores_current_and_closed_loans() {
    let desk = Desk::new();
    let member = desk.member("Asha");
    let other = desk.member("Ravi");
    let title = desk.title("Dune", 2);

    let current = desk.lend(member, title).await;
    let returned = desk.lend(other, title).await;
    desk.circulation.borrowing.return_book(returned.id, None).await.unwrap();

    desk.advance_days(5);
    let report = desk.circulation.fines.process_overdue_sweep().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.marked_overdue, 0);
    assert_eq!(desk.record(current.id).await.status, LoanStatus::Borrowed);
    assert_eq!(desk.record(returned.id).await.status, LoanStatus::Returned);
}

/// The plan's fine rate overrides the default.
#[tokio::test]
async fn test_plan_fine_rate() {
    let desk = Desk::new();
    let plan = premium_plan();
    let member = desk.member_on_plan("Asha", &plan);
    let title = desk.title("Dune", 1);
    let record = desk.lend(member, title).await;

    desk.advance_days(21 + 4);
    let outcome = desk
        .circulation
        .borrowing
        .return_book(record.id, None)
        .await
        .unwrap();
    assert_eq!(outcome.record.fine, Money::units(20));
}

/// Waiving zeroes the fine and marks it paid; repeating it changes nothing.
#[tokio::test]
async fn test_waive_is_idempotent() {
    let desk = Desk::new();
    let member = desk.member("Asha");
    let title = desk.title("Dune", 1);
    let record = desk.lend(member, title).await;
    desk.advance_days(14 + 3);
    desk.circulation.borrowing.return_book(record.id, None).await.unwrap();

    let first = desk.circulation.fines.waive(record.id).await.unwrap();
    let second = desk.circulation.fines.waive(record.id).await.unwrap();

    assert_eq!(first.fine, Money::ZERO);
    assert!(first.fine_paid);
    assert!(matches!(first.settlement, Some(FineSettlement::Waived { .. })));
    assert_eq!(first, second);
    assert_eq!(desk.events_named("FineWaived").len(), 1);
    assert!(desk.circulation.fines.unpaid_fines().await.unwrap().is_empty());
}

/// Waiving an unknown record reports it missing.
#[tokio::test]
async fn test_waive_unknown_record() {
    let desk = Desk::new();
    let result = desk.circulation.fines.waive(RecordId::new()).await;
    assert!(matches!(result, Err(CirculationError::NotFound { .. })));
}

/// A fine waived while the loan is out stays waived through later sweeps.
#[tokio::test]
async fn test_waived_active_loan_stays_settled() {
    let desk = Desk::new();
    let member = desk.member("Asha");
    let title = desk.title("Dune", 1);
    let record = desk.lend(member, title).await;

    desk.advance_days(16);
    desk.circulation.fines.process_overdue_sweep().await.unwrap();
    desk.circulation.fines.waive(record.id).await.unwrap();
    desk.advance_days(2);
    desk.circulation.fines.process_overdue_sweep().await.unwrap();

    let stored = desk.record(record.id).await;
    assert_eq!(stored.status, LoanStatus::Overdue);
    assert_eq!(stored.fine, Money::ZERO);
    assert!(stored.fine_paid);

    let outcome = desk
        .circulation
        .borrowing
        .return_book(record.id, None)
        .await
        .unwrap();
    assert_eq!(outcome.record.fine, Money::ZERO);
    assert!(outcome.record.fine_paid);
}

/// Staff record an in-person payment for a late return.
#[tokio::test]
async fn test_offline_payment_settles_fine() {
    let desk = Desk::new();
    let member = desk.member("Asha");
    let title = desk.title("Dune", 1);
    let record = desk.lend(member, title).await;
    desk.advance_days(14 + 5);
    desk.circulation.borrowing.return_book(record.id, None).await.unwrap();

    assert_eq!(desk.circulation.fines.unpaid_fines().await.unwrap().len(), 1);

    let paid = desk
        .circulation
        .fines
        .record_offline_payment(record.id, "desk-clerk", None)
        .await
        .unwrap();

    assert!(paid.fine_paid);
    assert_eq!(paid.fine, Money::ZERO);
    assert!(matches!(
        &paid.settlement,
        Some(FineSettlement::OfflinePayment { amount, collected_by, .. })
            if *amount == Money::units(50) && collected_by == "desk-clerk"
    ));
    assert!(desk.circulation.fines.unpaid_fines().await.unwrap().is_empty());

    let again = desk
        .circulation
        .fines
        .record_offline_payment(record.id, "desk-clerk", None)
        .await;
    assert!(matches!(again, Err(CirculationError::InvalidState(_))));
}

/// Nothing owed means nothing to pay.
#[tokio::test]
async fn test_offline_payment_without_fine() {
    let desk = Desk::new();
    let member = desk.member("Asha");
    let title = desk.title("Dune", 1);
    let record = desk.lend(member, title).await;
    desk.circulation.borrowing.return_book(record.id, None).await.unwrap();

    let result = desk
        .circulation
        .fines
        .record_offline_payment(record.id, "desk-clerk", None)
        .await;
    assert!(matches!(result, Err(CirculationError::InvalidState(_))));

    let zero = desk
        .circulation
        .fines
        .record_offline_payment(record.id, "desk-clerk", Some(Money::ZERO))
        .await;
    assert!(matches!(zero, Err(CirculationError::Validation(_))));
}

/// Damage after a settled overdue fine reopens the fine for the penalty only.
#[tokio::test]
async fn test_penalty_after_settlement() {
    let desk = Desk::new();
    let member = desk.member("Asha");
    let title = desk.title("Dune", 1);
    let record = desk.lend(member, title).await;

    desk.advance_days(17);
    desk.circulation
        .fines
        .record_offline_payment(record.id, "desk-clerk", None)
        .await
        .unwrap();
    desk.advance_days(3);

    let outcome = desk
        .circulation
        .borrowing
        .return_book(record.id, Some(ReturnCondition::Damaged))
        .await
        .unwrap();
    assert_eq!(outcome.record.fine, Money::units(200));
    assert!(!outcome.record.fine_paid);
}

/// The overdue view includes late loans the sweep has not tagged yet.
#[tokio::test]
async fn test_overdue_view_merges_tagged_and_untagged() {
    let desk = Desk::new();
    let asha = desk.member("Asha");
    let ravi = desk.member("Ravi");
    let mina = desk.member("Mina");
    let title = desk.title("Dune", 3);

    let tagged = desk.lend(asha, title).await;
    desk.advance_days(1);
    let untagged = desk.lend(ravi, title).await;
    desk.advance_days(10);
    let on_time = desk.lend(mina, title).await;

    desk.advance_days(4);
    desk.circulation.fines.process_overdue_sweep().await.unwrap();
    desk.advance_days(1);

    let overdue = desk.circulation.fines.overdue_loans().await.unwrap();
    let ids: Vec<RecordId> = overdue.iter().map(|o| o.record.id).collect();

    assert_eq!(ids, vec![tagged.id, untagged.id]);
    assert_eq!(overdue[0].record.status, LoanStatus::Overdue);
    assert_eq!(overdue[0].days_overdue, 2);
    assert_eq!(overdue[0].fine, Money::units(20));
    assert_eq!(overdue[1].record.status, LoanStatus::Borrowed);
    assert_eq!(overdue[1].days_overdue, 1);
    assert!(!ids.contains(&on_time.id));
}

/// The per-member overdue view leaves out other members and loans still in period.
#[tokio::test]
async fn test_overdue_loans_for_member() {
    let desk = Desk::new();
    let asha = desk.member("Asha");
    let ravi = desk.member("Ravi");
    let title = desk.title("Dune", 3);

    let late = desk.lend(asha, title).await;
    desk.lend(ravi, title).await;
    desk.advance_days(10);
    let current = desk.lend(asha, title).await;
    desk.advance_days(7);

    let overdue = desk
        .circulation
        .fines
        .overdue_loans_for_member(asha)
        .await
        .unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].record.id, late.id);
    assert_eq!(overdue[0].days_overdue, 3);
    assert_eq!(overdue[0].fine, Money::units(30));
    assert_ne!(overdue[0].record.id, current.id);

    assert_eq!(desk.circulation.fines.overdue_loans().await.unwrap().len(), 2);
    let nobody = desk
        .circulation
        .fines
        .overdue_loans_for_member(MemberId::new())
        .await
        .unwrap();
    assert!(nobody.is_empty());
}

/// Reminders go to overdue loans with unpaid fines only.
#[tokio::test]
async fn test_fine_reminders() {
    let desk = Desk::new();
    let asha = desk.member("Asha");
    let ravi = desk.member("Ravi");
    let title = desk.title("Dune", 2);

    let unpaid = desk.lend(asha, title).await;
    let waived = desk.lend(ravi, title).await;
    desk.advance_days(16);
    desk.circulation.fines.process_overdue_sweep().await.unwrap();
    desk.circulation.fines.waive(waived.id).await.unwrap();

    let sent = desk.circulation.fines.send_fine_reminders().await.unwrap();
    assert_eq!(sent, 1);

    let reminders = desk.events_named("FineReminder");
    assert!(matches!(
        &reminders[..],
        [CirculationEvent::FineReminder { record_id, fine, .. }]
            if *record_id == unpaid.id && *fine == Money::units(20)
    ));
}
