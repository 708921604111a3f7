//! Concurrency tests.
//!
//! Racing approvals for the last copies, racing allocations for one member,
//! and a randomized check that the copy counters always balance.
//!
//! Run with: `cargo test --test concurrency_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use circulation::error::CirculationError;
use circulation::types::{BorrowRecord, LoanStatus, MemberId, Money, ReturnCondition, TitleId};
use common::Desk;
use proptest::prelude::*;

async fn race_approvals(desk: &Desk, title: TitleId, contenders: usize) -> (usize, usize) {
    let mut requests = Vec::new();
    for i in 0..contenders {
        let member = desk.member(&format!("member-{i}"));
        let request = desk
            .circulation
            .borrowing
            .submit_request(member, title)
            .await
            .unwrap();
        requests.push(request.id);
    }

    let handles: Vec<_> = requests
        .into_iter()
        .map(|request_id| {
            let borrowing = desk.circulation.borrowing.clone();
            tokio::spawn(async move { borrowing.approve(request_id).await })
        })
        .collect();

    let mut approved = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => approved += 1,
            Err(error) => {
                assert!(
                    matches!(error, CirculationError::CapacityExceeded { .. }),
                    "unexpected error: {error}"
                );
                refused += 1;
            }
        }
    }
    (approved, refused)
}

/// Many staff approving requests for the last copy at once: exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_copy_goes_to_exactly_one_approval() {
    let desk = Desk::new();
    let title = desk.title("Dune", 1);

    let (approved, refused) = race_approvals(&desk, title, 12).await;

    assert_eq!(approved, 1);
    assert_eq!(refused, 11);
    assert_eq!(desk.available(title).await, 0);
    assert_eq!(desk.circulation.borrowing.active_loans().await.unwrap().len(), 1);
    assert_eq!(desk.circulation.borrowing.pending_requests().await.unwrap().len(), 11);
}

/// Twenty approvals racing for three copies: three loans, never more.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_copies_twenty_approvals() {
    let desk = Desk::new();
    let title = desk.title("Dune", 3);

    let (approved, refused) = race_approvals(&desk, title, 20).await;

    assert_eq!(approved, 3);
    assert_eq!(refused, 17);
    assert_eq!(desk.available(title).await, 0);
}

/// Concurrent returns on two titles never hand one member two copies.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_member_gets_at_most_one_allocation() {
    let desk = Desk::new();
    let first_holder = desk.member("First holder");
    let second_holder = desk.member("Second holder");
    let waiting = desk.member("Waiting");
    let dune = desk.title("Dune", 1);
    let emma = desk.title("Emma", 1);

    let first_loan = desk.lend(first_holder, dune).await;
    let second_loan = desk.lend(second_holder, emma).await;
    desk.circulation.reservations.reserve(waiting, dune).await.unwrap();
    desk.circulation.reservations.reserve(waiting, emma).await.unwrap();

    let first = {
        let borrowing = desk.circulation.borrowing.clone();
        tokio::spawn(async move { borrowing.return_book(first_loan.id, None).await })
    };
    let second = {
        let borrowing = desk.circulation.borrowing.clone();
        tokio::spawn(async move { borrowing.return_book(second_loan.id, None).await })
    };
    let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

    let allocations = outcomes.iter().filter(|o| o.allocation.is_some()).count();
    assert_eq!(allocations, 1);

    let loans: Vec<BorrowRecord> = desk
        .circulation
        .borrowing
        .history_for_member(waiting)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.status.is_active())
        .collect();
    assert_eq!(loans.len(), 1);
    assert_eq!(desk.available(dune).await + desk.available(emma).await, 1);

    let still_waiting = desk.circulation.reservations.queue_length(dune).await.unwrap()
        + desk.circulation.reservations.queue_length(emma).await.unwrap();
    assert_eq!(still_waiting, 1);
}

/// The overdue sweep and a return racing on the same late loan: the return
/// always wins cleanly and the fine is counted once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_and_return_race_on_one_loan() {
    for _ in 0..20 {
        let desk = Desk::new();
        let member = desk.member("Asha");
        let title = desk.title("Dune", 1);
        let record = desk.lend(member, title).await;
        desk.advance_days(14 + 5);

        let sweep = {
            let fines = desk.circulation.fines.clone();
            tokio::spawn(async move { fines.process_overdue_sweep().await })
        };
        let returned = {
            let borrowing = desk.circulation.borrowing.clone();
            tokio::spawn(async move { borrowing.return_book(record.id, None).await })
        };

        let report = sweep.await.unwrap().unwrap();
        let outcome = returned.await.unwrap().unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(outcome.record.status, LoanStatus::Returned);
        assert_eq!(outcome.record.fine, Money::units(50));

        let stored = desk.record(record.id).await;
        assert_eq!(stored.status, LoanStatus::Returned);
        assert_eq!(stored.fine, Money::units(50));
        assert_eq!(desk.available(title).await, 1);
    }
}

#[derive(Clone, Debug)]
enum Op {
    Lend { member: usize, title: usize },
    Return { loan: usize, condition: Option<ReturnCondition> },
    Reserve { member: usize, title: usize },
    AdvanceDays(i64),
}

fn op() -> impl Strategy<Value = Op> {
    let condition = prop_oneof![
        3 => Just(None),
        1 => Just(Some(ReturnCondition::Damaged)),
        1 => Just(Some(ReturnCondition::Lost)),
    ];
    prop_oneof![
        (0..4usize, 0..3usize).prop_map(|(member, title)| Op::Lend { member, title }),
        (0..16usize, condition).prop_map(|(loan, condition)| Op::Return { loan, condition }),
        (0..4usize, 0..3usize).prop_map(|(member, title)| Op::Reserve { member, title }),
        (1..20i64).prop_map(Op::AdvanceDays),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever happens, every copy is on the shelf, out on loan, or lost.
    #[test]
    fn prop_copies_always_accounted_for(ops in prop::collection::vec(op(), 1..40)) {
        tokio_test::block_on(async {
            let desk = Desk::new();
            let members: Vec<MemberId> = (0..4).map(|i| desk.member(&format!("m{i}"))).collect();
            let titles: Vec<TitleId> = (0..3u32).map(|i| desk.title(&format!("t{i}"), i + 1)).collect();
            let mut loans: Vec<BorrowRecord> = Vec::new();

            for op in ops {
                match op {
                    Op::Lend { member, title } => {
                        let Ok(request) = desk
                            .circulation
                            .borrowing
                            .submit_request(members[member], titles[title])
                            .await
                        else {
                            continue;
                        };
                        if let Ok(record) = desk.circulation.borrowing.approve(request.id).await {
                            loans.push(record);
                        }
                    }
                    Op::Return { loan, condition } => {
                        if let Some(record_id) = loans.get(loan).map(|r| r.id) {
                            if let Ok(outcome) = desk
                                .circulation
                                .borrowing
                                .return_book(record_id, condition)
                                .await
                            {
                                if let Some(allocation) = outcome.allocation {
                                    loans.push(allocation.record);
                                }
                            }
                        }
                    }
                    Op::Reserve { member, title } => {
                        let _ = desk
                            .circulation
                            .reservations
                            .reserve(members[member], titles[title])
                            .await;
                    }
                    Op::AdvanceDays(days) => desk.advance_days(days),
                }
            }

            let records = desk.circulation.borrowing.active_loans().await.unwrap();
            for (i, title) in titles.iter().enumerate() {
                let stock = desk.circulation.inventory.availability(*title).await.unwrap();
                let mut on_loan = 0;
                for record in &records {
                    if record.title_id == *title {
                        on_loan += 1;
                    }
                }
                let mut lost = 0;
                for record in &loans {
                    if record.title_id == *title && desk.record(record.id).await.status == LoanStatus::Lost {
                        lost += 1;
                    }
                }
                assert_eq!(stock.total_copies, u32::try_from(i).unwrap() + 1);
                assert!(stock.available_copies <= stock.total_copies);
                assert_eq!(stock.available_copies + on_loan + lost, stock.total_copies);
            }
        });
    }
}
