//! Borrow workflow: requests, approvals, renewals and returns.
//!
//! Approval takes a copy and opens a loan in one unit of work; return closes
//! the loan and puts the copy back in another. After a return the freed copy is
//! offered to the reservation queue in a separate step.

use crate::environment::CirculationEnvironment;
use crate::error::{CirculationError, EntityKind};
use crate::events::CirculationEvent;
use crate::fines::FineEngine;
use crate::inventory::InventoryLedger;
use crate::metrics;
use crate::plans::PlanResolver;
use crate::reservations::{Allocation, ReservationQueue};
use crate::store::{RecordFilter, RequestFilter, UnitOfWork};
use crate::types::{
    BorrowRecord, BorrowRequest, LoanStatus, MemberId, RecordId, RequestId, RequestStatus,
    ReturnCondition, TitleId,
};
use circulation_core::version::Versioned;
use serde::{Deserialize, Serialize};

/// Result of closing a loan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOutcome {
    /// The closed loan
    pub record: BorrowRecord,
    /// Reservation fulfilled with the returned copy, if any
    pub allocation: Option<Allocation>,
}

/// Drives borrow requests and loans through their lifecycles.
#[derive(Clone, Debug)]
pub struct BorrowWorkflow {
    env: CirculationEnvironment,
    ledger: InventoryLedger,
    plans: PlanResolver,
    fines: FineEngine,
    reservations: ReservationQueue,
}

impl BorrowWorkflow {
    /// Creates a borrow workflow over `env`
    #[must_use]
    pub fn new(env: CirculationEnvironment) -> Self {
        Self {
            ledger: InventoryLedger::new(env.clone()),
            plans: PlanResolver::new(env.clone()),
            fines: FineEngine::new(env.clone()),
            reservations: ReservationQueue::new(env.clone()),
            env,
        }
    }

    async fn load_request(&self, request_id: RequestId) -> Result<Versioned<BorrowRequest>, CirculationError> {
        self.env
            .store
            .request(request_id)
            .await?
            .ok_or_else(|| CirculationError::not_found(EntityKind::BorrowRequest, request_id))
    }

    async fn load_record(&self, record_id: RecordId) -> Result<Versioned<BorrowRecord>, CirculationError> {
        self.env
            .store
            .record(record_id)
            .await?
            .ok_or_else(|| CirculationError::not_found(EntityKind::BorrowRecord, record_id))
    }

    /// Ask to borrow a title. The request waits for staff approval.
    ///
    /// Availability here is only a hint; the copy is taken at approval.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown member or title
    /// - [`CirculationError::CapacityExceeded`] if no copy is on the shelf
    pub async fn submit_request(
        &self,
        member_id: MemberId,
        title_id: TitleId,
    ) -> Result<BorrowRequest, CirculationError> {
        if self.env.store.member(member_id).await?.is_none() {
            return Err(CirculationError::not_found(EntityKind::Member, member_id));
        }
        let title = self.ledger.load(title_id).await?;
        if title.available_copies == 0 {
            return Err(CirculationError::CapacityExceeded { title_id });
        }

        let request = BorrowRequest::pending(member_id, title_id, self.env.clock.now());
        self.env
            .store
            .commit(UnitOfWork::new().insert_request(request.clone()))
            .await?;

        tracing::info!(request_id = %request.id, %member_id, %title_id, "Borrow request submitted");
        metrics::record_request("submitted");
        self.env
            .publish([CirculationEvent::BorrowRequested {
                request_id: request.id,
                member_id,
                title_id,
            }])
            .await;
        Ok(request)
    }

    /// Approve a pending request: take a copy and open a loan.
    ///
    /// The copy, the request and the new loan are written together; concurrent
    /// approvals for the last copy cannot both succeed.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown request, title or member
    /// - [`CirculationError::InvalidState`] unless the request is pending
    /// - [`CirculationError::CapacityExceeded`] if no copy is available
    pub async fn approve(&self, request_id: RequestId) -> Result<BorrowRecord, CirculationError> {
        let (request, record) = self
            .env
            .atomically("approve_request", || self.try_approve(request_id))
            .await?;

        tracing::info!(
            %request_id,
            record_id = %record.id,
            member_id = %record.member_id,
            title_id = %record.title_id,
            due_at = %record.due_at,
            "Borrow request approved"
        );
        metrics::record_request("approved");
        self.env
            .publish([CirculationEvent::RequestApproved {
                request_id: request.id,
                record_id: record.id,
                member_id: record.member_id,
                title_id: record.title_id,
                due_at: record.due_at,
            }])
            .await;
        Ok(record)
    }

    async fn try_approve(&self, request_id: RequestId) -> Result<(BorrowRequest, BorrowRecord), CirculationError> {
        let request = self.load_request(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(CirculationError::InvalidState(format!(
                "borrow request {request_id} is {:?}, expected Pending",
                request.status
            )));
        }

        let title = self.ledger.load(request.title_id).await?;
        let terms = self.plans.resolve(request.member_id).await?;
        let now = self.env.clock.now();

        let record = BorrowRecord::open(request.member_id, request.title_id, now, &terms);
        let approved = request.approve(now, record.id)?;

        let (unit, _) = InventoryLedger::stage_checkout(UnitOfWork::new(), &title)?;
        let unit = unit
            .update_request(approved.clone(), request.version)
            .insert_record(record.clone());
        self.env.store.commit(unit).await?;
        Ok((approved, record))
    }

    /// Reject a pending request. Inventory is untouched.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown request
    /// - [`CirculationError::InvalidState`] unless the request is pending
    pub async fn reject(
        &self,
        request_id: RequestId,
        reason: Option<String>,
    ) -> Result<BorrowRequest, CirculationError> {
        let rejected = self
            .env
            .atomically("reject_request", || self.try_reject(request_id, reason.clone()))
            .await?;

        tracing::info!(%request_id, member_id = %rejected.member_id, "Borrow request rejected");
        metrics::record_request("rejected");
        self.env
            .publish([CirculationEvent::RequestRejected {
                request_id,
                member_id: rejected.member_id,
                title_id: rejected.title_id,
                reason: rejected.rejection_reason.clone(),
            }])
            .await;
        Ok(rejected)
    }

    async fn try_reject(&self, request_id: RequestId, reason: Option<String>) -> Result<BorrowRequest, CirculationError> {
        let request = self.load_request(request_id).await?;
        let rejected = request.reject(self.env.clock.now(), reason)?;
        self.env
            .store
            .commit(UnitOfWork::new().update_request(rejected.clone(), request.version))
            .await?;
        Ok(rejected)
    }

    /// Extend an active loan by the plan's renewal period.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown record
    /// - [`CirculationError::InvalidState`] if the loan is closed or has used
    ///   every renewal
    pub async fn renew(&self, record_id: RecordId) -> Result<BorrowRecord, CirculationError> {
        let record = self
            .env
            .atomically("renew_loan", || self.try_renew(record_id))
            .await?;

        tracing::info!(
            %record_id,
            renewals = record.renewals,
            due_at = %record.due_at,
            "Loan renewed"
        );
        metrics::record_renewal();
        self.env
            .publish([CirculationEvent::LoanRenewed {
                record_id,
                member_id: record.member_id,
                due_at: record.due_at,
                renewals: record.renewals,
            }])
            .await;
        Ok(record)
    }

    async fn try_renew(&self, record_id: RecordId) -> Result<BorrowRecord, CirculationError> {
        let current = self.load_record(record_id).await?;
        let terms = self.plans.resolve(current.member_id).await?;
        let now = self.env.clock.now();

        let mut renewed = current.renew(now, &terms)?;
        if !renewed.is_settled() {
            renewed.fine = self.fines.compute_fine(&renewed, &terms, now).total();
        }

        self.env
            .store
            .commit(UnitOfWork::new().update_record(renewed.clone(), current.version))
            .await?;
        Ok(renewed)
    }

    /// Close a loan, assessing its fine.
    ///
    /// Without a condition the copy goes back on the shelf as `Returned`.
    /// `Damaged` also shelves the copy; `Lost` does not, and the title's total
    /// stock is left as is. A shelved copy is then offered to the reservation
    /// queue; if that allocation fails the return still stands.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown record
    /// - [`CirculationError::InvalidState`] if the loan is already closed
    pub async fn return_book(
        &self,
        record_id: RecordId,
        condition: Option<ReturnCondition>,
    ) -> Result<ReturnOutcome, CirculationError> {
        let record = self
            .env
            .atomically("return_book", || self.try_return(record_id, condition))
            .await?;

        tracing::info!(
            %record_id,
            member_id = %record.member_id,
            status = ?record.status,
            fine = %record.fine,
            "Loan closed"
        );
        metrics::record_loan_closed(record.status, record.fine);

        self.env
            .publish([CirculationEvent::LoanClosed {
                record_id,
                member_id: record.member_id,
                title_id: record.title_id,
                status: record.status,
                fine: record.fine,
                condition,
            }])
            .await;

        let allocation = if record.status == LoanStatus::Lost {
            None
        } else {
            match self.reservations.allocate_next(record.title_id).await {
                Ok(allocation) => allocation,
                Err(error) => {
                    tracing::warn!(
                        title_id = %record.title_id,
                        %error,
                        "Could not allocate returned copy to a reservation"
                    );
                    None
                }
            }
        };

        Ok(ReturnOutcome { record, allocation })
    }

    async fn try_return(
        &self,
        record_id: RecordId,
        condition: Option<ReturnCondition>,
    ) -> Result<BorrowRecord, CirculationError> {
        let current = self.load_record(record_id).await?;
        let terms = self.plans.resolve(current.member_id).await?;
        let now = self.env.clock.now();

        let fine = self.fines.closing_fine(&current, &terms, now, condition);
        let closed = current.close(now, condition, fine)?;

        let mut unit = UnitOfWork::new().update_record(closed.clone(), current.version);
        if condition != Some(ReturnCondition::Lost) {
            let title = self.ledger.load(current.title_id).await?;
            (unit, _) = InventoryLedger::stage_checkin(unit, &title)?;
        }
        self.env.store.commit(unit).await?;
        Ok(closed)
    }

    /// Requests waiting for a decision, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn pending_requests(&self) -> Result<Vec<BorrowRequest>, CirculationError> {
        let requests = self
            .env
            .store
            .requests(RequestFilter::with_status(RequestStatus::Pending))
            .await?;
        Ok(requests.into_iter().map(Versioned::into_inner).collect())
    }

    /// Every request a member has made, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn requests_for_member(&self, member_id: MemberId) -> Result<Vec<BorrowRequest>, CirculationError> {
        let requests = self
            .env
            .store
            .requests(RequestFilter::for_member(member_id))
            .await?;
        Ok(requests.into_iter().map(Versioned::into_inner).collect())
    }

    /// A member's loans, newest first.
    ///
    /// Active loans carry the fine owed as of now rather than the cached amount.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown member
    /// - an error if the store query fails
    pub async fn history_for_member(&self, member_id: MemberId) -> Result<Vec<BorrowRecord>, CirculationError> {
        let terms = self.plans.resolve(member_id).await?;
        let now = self.env.clock.now();

        let mut history: Vec<BorrowRecord> = self
            .env
            .store
            .records(RecordFilter::for_member(member_id))
            .await?
            .into_iter()
            .map(|versioned| {
                let mut record = versioned.into_inner();
                if record.status.is_active() && !record.is_settled() {
                    record.fine = self.fines.compute_fine(&record, &terms, now).total();
                }
                record
            })
            .collect();
        history.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at));
        Ok(history)
    }

    /// Every loan still out, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn active_loans(&self) -> Result<Vec<BorrowRecord>, CirculationError> {
        let records = self.env.store.records(RecordFilter::active()).await?;
        Ok(records.into_iter().map(Versioned::into_inner).collect())
    }

    /// A member's loans still out, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn active_loans_for_member(&self, member_id: MemberId) -> Result<Vec<BorrowRecord>, CirculationError> {
        let records = self
            .env
            .store
            .records(RecordFilter::active().member(member_id))
            .await?;
        Ok(records.into_iter().map(Versioned::into_inner).collect())
    }
}
