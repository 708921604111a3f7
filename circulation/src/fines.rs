//! Fine engine: assessment, settlement and the daily overdue jobs.
//!
//! Fines are always recomputed from the due date, never accumulated, so running
//! the sweep twice on the same day changes nothing the second time.
//!
//! A settled fine (waived or paid) stays settled: later sweeps leave its amount
//! alone, and a return only adds the damage or loss penalty on top.

use crate::config::PolicyConfig;
use crate::environment::CirculationEnvironment;
use crate::error::{CirculationError, EntityKind};
use crate::events::CirculationEvent;
use crate::metrics;
use crate::plans::PlanResolver;
use crate::store::{RecordFilter, UnitOfWork};
use crate::types::{
    BorrowRecord, FineSettlement, LoanStatus, MemberId, Money, PlanTerms, RecordId,
    ReturnCondition,
};
use chrono::{DateTime, Utc};
use circulation_core::version::Versioned;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Whole 24-hour periods from `due` to `end`, never negative.
#[must_use]
pub fn days_overdue(due: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - due).num_days().max(0)
}

/// How a fine amount was put together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineBreakdown {
    /// Whole days past due
    pub days_overdue: i64,
    /// `days_overdue * fine_per_day`
    pub overdue: Money,
    /// Flat damage or loss charge
    pub penalty: Money,
}

impl FineBreakdown {
    /// Overdue charge plus penalty.
    #[must_use]
    pub const fn total(&self) -> Money {
        self.overdue.saturating_add(self.penalty)
    }
}

/// Assess a fine for a loan due at `due` and ending at `end`.
#[must_use]
pub fn assess(
    policy: &PolicyConfig,
    fine_per_day: Money,
    due: DateTime<Utc>,
    end: DateTime<Utc>,
    condition: Option<ReturnCondition>,
) -> FineBreakdown {
    let days = days_overdue(due, end);
    let penalty = match condition {
        Some(ReturnCondition::Damaged) => policy.damage_fine,
        Some(ReturnCondition::Lost) => policy.lost_fine,
        None => Money::ZERO,
    };
    FineBreakdown {
        days_overdue: days,
        overdue: fine_per_day.saturating_mul(u64::try_from(days).unwrap_or(0)),
        penalty,
    }
}

/// A loan that is past due right now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueLoan {
    /// The loan as stored
    pub record: BorrowRecord,
    /// Whole days past due
    pub days_overdue: i64,
    /// Fine owed as of now
    pub fine: Money,
}

/// Result of one overdue sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Active loans examined
    pub scanned: usize,
    /// Loans moved from `Borrowed` to `Overdue`
    pub marked_overdue: usize,
    /// Already-overdue loans whose cached fine changed
    pub refreshed: usize,
    /// Loans that could not be processed
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SweepOutcome {
    Unchanged,
    MarkedOverdue,
    Refreshed,
}

/// Computes fines and handles waivers, payments, sweeps and reminders.
#[derive(Clone, Debug)]
pub struct FineEngine {
    env: CirculationEnvironment,
    plans: PlanResolver,
}

impl FineEngine {
    /// Creates a fine engine over `env`
    #[must_use]
    pub fn new(env: CirculationEnvironment) -> Self {
        let plans = PlanResolver::new(env.clone());
        Self { env, plans }
    }

    /// Fine for `record` as of `now` under `terms`.
    ///
    /// Active loans accrue up to `now`; closed loans up to their return time.
    /// Damaged and lost loans carry their flat penalty.
    #[must_use]
    pub fn compute_fine(&self, record: &BorrowRecord, terms: &PlanTerms, now: DateTime<Utc>) -> FineBreakdown {
        let condition = match record.status {
            LoanStatus::Damaged => Some(ReturnCondition::Damaged),
            LoanStatus::Lost => Some(ReturnCondition::Lost),
            _ => None,
        };
        assess(
            &self.env.policy,
            terms.fine_per_day,
            record.due_at,
            record.returned_at.unwrap_or(now),
            condition,
        )
    }

    /// Fine to charge when closing `record` at `now`.
    pub(crate) fn closing_fine(
        &self,
        record: &BorrowRecord,
        terms: &PlanTerms,
        now: DateTime<Utc>,
        condition: Option<ReturnCondition>,
    ) -> Money {
        let breakdown = assess(&self.env.policy, terms.fine_per_day, record.due_at, now, condition);
        if record.is_settled() {
            breakdown.penalty
        } else {
            breakdown.total()
        }
    }

    /// Outstanding amount on `record` at `now`.
    fn amount_due(&self, record: &BorrowRecord, terms: &PlanTerms, now: DateTime<Utc>) -> Money {
        if record.is_settled() {
            Money::ZERO
        } else if record.status.is_active() {
            self.compute_fine(record, terms, now).total()
        } else {
            record.fine
        }
    }

    async fn load(&self, record_id: RecordId) -> Result<Versioned<BorrowRecord>, CirculationError> {
        self.env
            .store
            .record(record_id)
            .await?
            .ok_or_else(|| CirculationError::not_found(EntityKind::BorrowRecord, record_id))
    }

    /// Clear a loan's fine by staff decision.
    ///
    /// Sets the amount to zero and marks it paid, whatever its state. Waiving
    /// a loan with nothing outstanding is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::NotFound`] for an unknown record.
    pub async fn waive(&self, record_id: RecordId) -> Result<BorrowRecord, CirculationError> {
        let (record, changed) = self
            .env
            .atomically("waive_fine", || self.try_waive(record_id))
            .await?;

        if changed {
            tracing::info!(record_id = %record.id, member_id = %record.member_id, "Fine waived");
            metrics::record_fine_settled("waived");
            self.env
                .publish([CirculationEvent::FineWaived {
                    record_id: record.id,
                    member_id: record.member_id,
                }])
                .await;
        }
        Ok(record)
    }

    /// Record a fine paid in person.
    ///
    /// `amount` defaults to the outstanding amount and is kept on the
    /// settlement; the fine itself is cleared.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown record
    /// - [`CirculationError::InvalidState`] if nothing is owed
    /// - [`CirculationError::Validation`] for a zero amount
    pub async fn record_offline_payment(
        &self,
        record_id: RecordId,
        collected_by: &str,
        amount: Option<Money>,
    ) -> Result<BorrowRecord, CirculationError> {
        if amount.is_some_and(|a| a.is_zero()) {
            return Err(CirculationError::Validation(
                "payment amount must be greater than zero".to_string(),
            ));
        }
        if collected_by.trim().is_empty() {
            return Err(CirculationError::Validation(
                "collecting staff member is required".to_string(),
            ));
        }

        let (record, paid) = self
            .env
            .atomically("offline_payment", || {
                self.try_offline_payment(record_id, collected_by, amount)
            })
            .await?;

        tracing::info!(
            record_id = %record.id,
            member_id = %record.member_id,
            amount = %paid,
            collected_by,
            "Offline fine payment recorded"
        );
        metrics::record_fine_settled("offline");
        self.env
            .publish([CirculationEvent::FinePaid {
                record_id: record.id,
                member_id: record.member_id,
                amount: paid,
                collected_by: collected_by.to_string(),
            }])
            .await;
        Ok(record)
    }

    /// Tag past-due loans `Overdue` and refresh their cached fines.
    ///
    /// Each loan is handled in its own unit of work. A loan returned while the
    /// sweep runs is skipped; one that fails is logged and counted, and the
    /// sweep moves on.
    ///
    /// # Errors
    ///
    /// Returns an error only if the initial scan fails.
    pub async fn process_overdue_sweep(&self) -> Result<SweepReport, CirculationError> {
        let started = Instant::now();
        let candidates = self.env.store.records(RecordFilter::active()).await?;
        let mut report = SweepReport::default();

        for candidate in candidates {
            report.scanned += 1;
            match self.sweep_one(candidate.id).await {
                Ok(SweepOutcome::MarkedOverdue) => report.marked_overdue += 1,
                Ok(SweepOutcome::Refreshed) => report.refreshed += 1,
                Ok(SweepOutcome::Unchanged) => {}
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(record_id = %candidate.id, %error, "Overdue sweep skipped record");
                }
            }
        }

        metrics::record_sweep(report.marked_overdue, started.elapsed().as_secs_f64());
        tracing::info!(
            scanned = report.scanned,
            marked_overdue = report.marked_overdue,
            refreshed = report.refreshed,
            failed = report.failed,
            "Overdue sweep finished"
        );
        Ok(report)
    }

    async fn sweep_one(&self, record_id: RecordId) -> Result<SweepOutcome, CirculationError> {
        let (outcome, event) = self
            .env
            .atomically("overdue_sweep", || self.try_sweep_one(record_id))
            .await?;

        if let Some(event) = event {
            tracing::debug!(%record_id, "Loan marked overdue");
            self.env.publish([event]).await;
        }
        Ok(outcome)
    }

    async fn try_waive(&self, record_id: RecordId) -> Result<(BorrowRecord, bool), CirculationError> {
        let current = self.load(record_id).await?;
        if current.fine_paid && current.fine.is_zero() {
            return Ok((current.into_inner(), false));
        }

        let now = self.env.clock.now();
        let waived = BorrowRecord {
            fine: Money::ZERO,
            fine_paid: true,
            settlement: Some(FineSettlement::Waived {
                reference: format!("WAIVED-{}", now.timestamp_millis()),
                at: now,
            }),
            ..current.value.clone()
        };
        self.env
            .store
            .commit(UnitOfWork::new().update_record(waived.clone(), current.version))
            .await?;
        Ok((waived, true))
    }

    async fn try_offline_payment(
        &self,
        record_id: RecordId,
        collected_by: &str,
        amount: Option<Money>,
    ) -> Result<(BorrowRecord, Money), CirculationError> {
        let current = self.load(record_id).await?;
        let terms = self.plans.resolve(current.member_id).await?;
        let now = self.env.clock.now();
        let due = self.amount_due(&current, &terms, now);
        if due.is_zero() {
            return Err(CirculationError::InvalidState(format!(
                "borrow record {record_id} has no outstanding fine"
            )));
        }

        let paid = amount.unwrap_or(due);
        let settled = BorrowRecord {
            fine: Money::ZERO,
            fine_paid: true,
            settlement: Some(FineSettlement::OfflinePayment {
                amount: paid,
                collected_by: collected_by.to_string(),
                at: now,
            }),
            ..current.value.clone()
        };
        self.env
            .store
            .commit(UnitOfWork::new().update_record(settled.clone(), current.version))
            .await?;
        Ok((settled, paid))
    }

    async fn try_sweep_one(
        &self,
        record_id: RecordId,
    ) -> Result<(SweepOutcome, Option<CirculationEvent>), CirculationError> {
        let Some(current) = self.env.store.record(record_id).await? else {
            return Ok((SweepOutcome::Unchanged, None));
        };
        let now = self.env.clock.now();
        if !current.status.is_active() || !current.is_past_due(now) {
            return Ok((SweepOutcome::Unchanged, None));
        }

        let terms = self.plans.resolve(current.member_id).await?;
        let breakdown = self.compute_fine(&current, &terms, now);
        let fine = if current.is_settled() {
            current.fine
        } else {
            breakdown.total()
        };
        let next = BorrowRecord {
            status: LoanStatus::Overdue,
            fine,
            ..current.value.clone()
        };
        if next == current.value {
            return Ok((SweepOutcome::Unchanged, None));
        }

        self.env
            .store
            .commit(UnitOfWork::new().update_record(next.clone(), current.version))
            .await?;

        if current.status == LoanStatus::Borrowed {
            let event = CirculationEvent::LoanOverdue {
                record_id,
                member_id: next.member_id,
                title_id: next.title_id,
                days_overdue: breakdown.days_overdue,
                fine,
            };
            Ok((SweepOutcome::MarkedOverdue, Some(event)))
        } else {
            Ok((SweepOutcome::Refreshed, None))
        }
    }

    /// Publish a reminder for every overdue loan with an unpaid fine.
    ///
    /// Returns the number of reminders sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    pub async fn send_fine_reminders(&self) -> Result<usize, CirculationError> {
        let now = self.env.clock.now();
        let overdue = self
            .env
            .store
            .records(RecordFilter::with_statuses(&[LoanStatus::Overdue]))
            .await?;

        let mut reminders = Vec::new();
        for record in overdue {
            if record.is_settled() {
                continue;
            }
            let terms = self.plans.resolve(record.member_id).await?;
            let fine = self.amount_due(&record, &terms, now);
            if fine.is_zero() {
                continue;
            }
            reminders.push(CirculationEvent::FineReminder {
                record_id: record.id,
                member_id: record.member_id,
                title_id: record.title_id,
                fine,
            });
        }

        let sent = reminders.len();
        self.env.publish(reminders).await;
        tracing::info!(sent, "Fine reminders sent");
        Ok(sent)
    }

    /// Loans with a fine that is neither paid nor waived.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn unpaid_fines(&self) -> Result<Vec<BorrowRecord>, CirculationError> {
        let records = self.env.store.records(RecordFilter::default()).await?;
        Ok(records
            .into_iter()
            .map(Versioned::into_inner)
            .filter(|r| !r.fine.is_zero() && !r.fine_paid)
            .collect())
    }

    /// Every loan past due right now, whether or not the sweep has tagged it.
    ///
    /// Fines are computed live. Sorted by due date, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn overdue_loans(&self) -> Result<Vec<OverdueLoan>, CirculationError> {
        self.overdue_matching(RecordFilter::active()).await
    }

    /// One member's loans past due right now, ordered like [`Self::overdue_loans`].
    ///
    /// An unknown member simply has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn overdue_loans_for_member(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<OverdueLoan>, CirculationError> {
        self.overdue_matching(RecordFilter::active().member(member_id)).await
    }

    async fn overdue_matching(
        &self,
        filter: RecordFilter,
    ) -> Result<Vec<OverdueLoan>, CirculationError> {
        let now = self.env.clock.now();
        let active = self.env.store.records(filter).await?;

        let mut loans = Vec::new();
        for record in active {
            if record.status != LoanStatus::Overdue && !record.is_past_due(now) {
                continue;
            }
            let terms = self.plans.resolve(record.member_id).await?;
            let breakdown = self.compute_fine(&record, &terms, now);
            let fine = self.amount_due(&record, &terms, now);
            loans.push(OverdueLoan {
                record: record.into_inner(),
                days_overdue: breakdown.days_overdue,
                fine,
            });
        }
        loans.sort_by_key(|loan| loan.record.due_at);
        Ok(loans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(hours: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default() + Duration::hours(hours)
    }

    #[test]
    fn days_overdue_counts_whole_days() {
        assert_eq!(days_overdue(at(0), at(0)), 0);
        assert_eq!(days_overdue(at(0), at(23)), 0);
        assert_eq!(days_overdue(at(0), at(24)), 1);
        assert_eq!(days_overdue(at(0), at(5 * 24 + 3)), 5);
        assert_eq!(days_overdue(at(48), at(0)), 0);
    }

    #[test]
    fn five_days_late_at_ten_per_day() {
        let policy = PolicyConfig::default();
        let fine = assess(&policy, Money::units(10), at(0), at(5 * 24), None);
        assert_eq!(fine.total(), Money::units(50));
        assert_eq!(fine.days_overdue, 5);
    }

    #[test]
    fn penalties_add_to_overdue_charge() {
        let policy = PolicyConfig::default();
        let damaged = assess(&policy, Money::units(10), at(0), at(0), Some(ReturnCondition::Damaged));
        assert_eq!(damaged.total(), Money::units(200));

        let lost_late = assess(&policy, Money::units(10), at(0), at(48), Some(ReturnCondition::Lost));
        assert_eq!(lost_late.overdue, Money::units(20));
        assert_eq!(lost_late.total(), Money::units(520));
    }

    #[test]
    fn on_time_return_is_free() {
        let policy = PolicyConfig::default();
        let fine = assess(&policy, Money::units(10), at(24), at(0), None);
        assert_eq!(fine, FineBreakdown::default());
    }
}
