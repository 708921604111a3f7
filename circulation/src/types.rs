//! Domain types for library circulation.
//!
//! Value objects, entities and their state transitions. Every transition here is a
//! pure function from the current row to the next one (or an error); services
//! load rows, call these, and commit the results atomically.

use crate::error::{CirculationError, EntityKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Renewals allowed per loan, system-wide.
pub const MAX_RENEWALS: u32 = 2;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from a `Uuid`
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a catalog title
    TitleId
);
uuid_id!(
    /// Unique identifier for a library member
    MemberId
);
uuid_id!(
    /// Unique identifier for a membership plan
    PlanId
);
uuid_id!(
    /// Unique identifier for a borrow request
    RequestId
);
uuid_id!(
    /// Unique identifier for a borrow record (loan)
    RecordId
);
uuid_id!(
    /// Unique identifier for a reservation
    ReservationId
);

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// Non-negative amount of money in minor currency units (e.g. paise, cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Creates a `Money` value from whole currency units, saturating on overflow
    #[must_use]
    pub const fn units(units: u64) -> Self {
        Self(units.saturating_mul(100))
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts, saturating at the maximum
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Multiplies by a count (e.g. days overdue), saturating at the maximum
    #[must_use]
    pub const fn saturating_mul(self, count: u64) -> Self {
        Self(self.0.saturating_mul(count))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Title (inventory)
// ============================================================================

/// Physical condition tag of a title's stock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShelfCondition {
    /// Recently acquired
    New,
    /// Normal wear
    #[default]
    Good,
    /// Usable but worn
    Worn,
    /// Needs repair or replacement
    NeedsRepair,
}

/// One catalog entry with its stock of physical copies.
///
/// Invariant: `available_copies <= total_copies`. The counters are the single
/// source of truth for availability; nothing else caches them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    /// Title identifier
    pub id: TitleId,
    /// Display name
    pub name: String,
    /// Copies owned by the library
    pub total_copies: u32,
    /// Copies on the shelf right now
    pub available_copies: u32,
    /// Condition tag
    pub condition: ShelfCondition,
}

impl Title {
    /// A title with every copy on the shelf.
    #[must_use]
    pub fn new(id: TitleId, name: impl Into<String>, total_copies: u32) -> Self {
        Self {
            id,
            name: name.into(),
            total_copies,
            available_copies: total_copies,
            condition: ShelfCondition::default(),
        }
    }

    /// A title with explicit counters.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::Validation`] if `available > total`.
    pub fn with_counts(
        id: TitleId,
        name: impl Into<String>,
        total_copies: u32,
        available_copies: u32,
    ) -> Result<Self, CirculationError> {
        let title = Self {
            id,
            name: name.into(),
            total_copies,
            available_copies,
            condition: ShelfCondition::default(),
        };
        title.validate()?;
        Ok(title)
    }

    /// Check the copy-count invariant.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::Validation`] if `available > total`.
    pub fn validate(&self) -> Result<(), CirculationError> {
        if self.available_copies > self.total_copies {
            return Err(CirculationError::Validation(format!(
                "title {}: available copies {} exceed total copies {}",
                self.id, self.available_copies, self.total_copies
            )));
        }
        Ok(())
    }

    /// The title after one copy leaves the shelf.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::CapacityExceeded`] if no copy is available.
    pub fn take_copy(&self) -> Result<Self, CirculationError> {
        let Some(available_copies) = self.available_copies.checked_sub(1) else {
            return Err(CirculationError::CapacityExceeded { title_id: self.id });
        };
        Ok(Self {
            available_copies,
            ..self.clone()
        })
    }

    /// The title after one copy comes back to the shelf.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::Validation`] if every copy is already on
    /// the shelf.
    pub fn return_copy(&self) -> Result<Self, CirculationError> {
        let next = Self {
            available_copies: self.available_copies.saturating_add(1),
            ..self.clone()
        };
        if self.available_copies == u32::MAX {
            return Err(CirculationError::Validation(format!(
                "title {}: available copies counter overflow",
                self.id
            )));
        }
        next.validate()?;
        Ok(next)
    }
}

// ============================================================================
// Members and plans
// ============================================================================

/// A library member as seen by circulation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member identifier
    pub id: MemberId,
    /// Display name
    pub name: String,
    /// Active membership plan, if any
    pub plan_id: Option<PlanId>,
}

impl Member {
    /// Creates a member
    #[must_use]
    pub fn new(id: MemberId, name: impl Into<String>, plan_id: Option<PlanId>) -> Self {
        Self {
            id,
            name: name.into(),
            plan_id,
        }
    }
}

/// Borrowing policy bundle attached to a membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPlan {
    /// Plan identifier
    pub id: PlanId,
    /// Plan name (e.g. "Basic", "Premium")
    pub name: String,
    /// Loan period in days
    pub borrow_days: u32,
    /// Days added per renewal
    pub renewal_days: u32,
    /// Per-day overdue fine; `None` means "use the system default"
    pub fine_per_day: Option<Money>,
}

/// Policy parameters resolved for one member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTerms {
    /// Plan the terms came from (`None` when system defaults applied)
    pub plan_id: Option<PlanId>,
    /// Loan period in days
    pub borrow_days: u32,
    /// Days added per renewal
    pub renewal_days: u32,
    /// Renewal cap
    pub max_renewals: u32,
    /// Overdue fine per day
    pub fine_per_day: Money,
}

impl PlanTerms {
    /// Loan period as a duration.
    #[must_use]
    pub fn loan_period(&self) -> Duration {
        Duration::days(i64::from(self.borrow_days))
    }

    /// Renewal extension as a duration.
    #[must_use]
    pub fn renewal_period(&self) -> Duration {
        Duration::days(i64::from(self.renewal_days))
    }
}

// ============================================================================
// Borrow requests
// ============================================================================

/// Lifecycle of a borrow request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Waiting for staff decision
    Pending,
    /// Approved; a loan was opened
    Approved,
    /// Rejected by staff
    Rejected,
}

impl RequestStatus {
    /// Whether the request can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A member's ask to borrow a title, subject to staff approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRequest {
    /// Request identifier
    pub id: RequestId,
    /// Requesting member
    pub member_id: MemberId,
    /// Requested title
    pub title_id: TitleId,
    /// Current status
    pub status: RequestStatus,
    /// When the request was submitted
    pub requested_at: DateTime<Utc>,
    /// When the request was approved
    pub approved_at: Option<DateTime<Utc>>,
    /// When the request was rejected
    pub rejected_at: Option<DateTime<Utc>>,
    /// Staff-supplied rejection reason
    pub rejection_reason: Option<String>,
    /// Loan opened by the approval
    pub record_id: Option<RecordId>,
}

impl BorrowRequest {
    /// A new pending request.
    #[must_use]
    pub fn pending(member_id: MemberId, title_id: TitleId, now: DateTime<Utc>) -> Self {
        Self {
            id: RequestId::new(),
            member_id,
            title_id,
            status: RequestStatus::Pending,
            requested_at: now,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            record_id: None,
        }
    }

    fn ensure_pending(&self) -> Result<(), CirculationError> {
        if self.status == RequestStatus::Pending {
            Ok(())
        } else {
            Err(CirculationError::InvalidState(format!(
                "borrow request {} is {:?}, expected Pending",
                self.id, self.status
            )))
        }
    }

    /// The request after approval.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::InvalidState`] unless the request is pending.
    pub fn approve(&self, now: DateTime<Utc>, record_id: RecordId) -> Result<Self, CirculationError> {
        self.ensure_pending()?;
        Ok(Self {
            status: RequestStatus::Approved,
            approved_at: Some(now),
            record_id: Some(record_id),
            ..self.clone()
        })
    }

    /// The request after rejection.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::InvalidState`] unless the request is pending.
    pub fn reject(&self, now: DateTime<Utc>, reason: Option<String>) -> Result<Self, CirculationError> {
        self.ensure_pending()?;
        Ok(Self {
            status: RequestStatus::Rejected,
            rejected_at: Some(now),
            rejection_reason: reason,
            ..self.clone()
        })
    }
}

// ============================================================================
// Borrow records (loans)
// ============================================================================

/// Loan status.
///
/// `Borrowed` and `Overdue` are active; the rest are terminal. `Overdue` is a
/// cached tag for "borrowed, past due and not returned", maintained by the
/// overdue sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    /// On loan, within its due date
    Borrowed,
    /// On loan and tagged past due by the sweep
    Overdue,
    /// Returned intact (possibly late)
    Returned,
    /// Returned damaged
    Damaged,
    /// Reported lost
    Lost,
}

impl LoanStatus {
    /// Statuses of loans still out.
    pub const ACTIVE: [Self; 2] = [Self::Borrowed, Self::Overdue];

    /// Whether the copy is still with the member.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Borrowed | Self::Overdue)
    }

    /// Whether the loan is closed for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// Condition reported at return time when the copy is not intact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnCondition {
    /// Copy came back damaged
    Damaged,
    /// Copy will not come back
    Lost,
}

impl ReturnCondition {
    /// Terminal loan status for this condition.
    #[must_use]
    pub const fn loan_status(self) -> LoanStatus {
        match self {
            Self::Damaged => LoanStatus::Damaged,
            Self::Lost => LoanStatus::Lost,
        }
    }
}

/// How an outstanding fine was cleared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FineSettlement {
    /// Staff waived the fine
    Waived {
        /// Marker stored in place of a payment reference
        reference: String,
        /// When the waiver was recorded
        at: DateTime<Utc>,
    },
    /// Paid in person and recorded by staff
    OfflinePayment {
        /// Amount collected
        amount: Money,
        /// Staff member who collected it
        collected_by: String,
        /// When the payment was recorded
        at: DateTime<Utc>,
    },
}

/// The record of one loan, from issue to terminal disposition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRecord {
    /// Record identifier
    pub id: RecordId,
    /// Borrowing member
    pub member_id: MemberId,
    /// Borrowed title
    pub title_id: TitleId,
    /// When the loan started
    pub borrowed_at: DateTime<Utc>,
    /// When the copy is due back
    pub due_at: DateTime<Utc>,
    /// When the copy came back (or was reported lost)
    pub returned_at: Option<DateTime<Utc>>,
    /// Loan status
    pub status: LoanStatus,
    /// Persisted fine amount
    pub fine: Money,
    /// Whether the fine has been cleared
    pub fine_paid: bool,
    /// Renewals used so far
    pub renewals: u32,
    /// How the fine was cleared, if it was
    pub settlement: Option<FineSettlement>,
    /// Reservation this loan fulfilled, for auto-allocated loans
    pub reservation_id: Option<ReservationId>,
}

impl BorrowRecord {
    /// Open a loan starting `now` under `terms`.
    #[must_use]
    pub fn open(member_id: MemberId, title_id: TitleId, now: DateTime<Utc>, terms: &PlanTerms) -> Self {
        Self {
            id: RecordId::new(),
            member_id,
            title_id,
            borrowed_at: now,
            due_at: now + terms.loan_period(),
            returned_at: None,
            status: LoanStatus::Borrowed,
            fine: Money::ZERO,
            fine_paid: false,
            renewals: 0,
            settlement: None,
            reservation_id: None,
        }
    }

    /// Mark this loan as created from a reservation.
    #[must_use]
    pub const fn from_reservation(mut self, reservation_id: ReservationId) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }

    /// Whether the due date has passed at `now` and the copy is still out.
    #[must_use]
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.returned_at.is_none() && self.due_at < now
    }

    fn ensure_active(&self) -> Result<(), CirculationError> {
        if self.status.is_active() {
            Ok(())
        } else {
            Err(CirculationError::InvalidState(format!(
                "borrow record {} is {:?}, expected an active loan",
                self.id, self.status
            )))
        }
    }

    /// The loan after one renewal.
    ///
    /// Extends the due date and refreshes the cached overdue tag: a loan whose
    /// new due date is in the future goes back to `Borrowed`. A loan is never
    /// moved *into* `Overdue` here; that is the sweep's job.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::InvalidState`] if the loan is closed or the
    /// renewal cap is reached.
    pub fn renew(&self, now: DateTime<Utc>, terms: &PlanTerms) -> Result<Self, CirculationError> {
        self.ensure_active()?;
        if self.renewals >= terms.max_renewals {
            return Err(CirculationError::InvalidState(format!(
                "borrow record {} already renewed {} times (max {})",
                self.id, self.renewals, terms.max_renewals
            )));
        }

        let due_at = self.due_at + terms.renewal_period();
        let status = if self.status == LoanStatus::Overdue && due_at > now {
            LoanStatus::Borrowed
        } else {
            self.status
        };

        Ok(Self {
            due_at,
            status,
            renewals: self.renewals + 1,
            ..self.clone()
        })
    }

    /// The loan after the copy comes back (or is reported lost).
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::InvalidState`] if the loan is already closed.
    pub fn close(
        &self,
        now: DateTime<Utc>,
        condition: Option<ReturnCondition>,
        fine: Money,
    ) -> Result<Self, CirculationError> {
        self.ensure_active()?;
        let status = condition.map_or(LoanStatus::Returned, ReturnCondition::loan_status);
        Ok(Self {
            returned_at: Some(now),
            status,
            fine,
            fine_paid: self.fine_paid && fine.is_zero(),
            ..self.clone()
        })
    }

    /// Whether the fine has been cleared by waiver or payment.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.fine_paid
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// Lifecycle of a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Waiting in the queue
    Active,
    /// Withdrawn by the member or staff
    Cancelled,
    /// A copy was allocated to the member
    Fulfilled,
}

/// A FIFO waitlist entry for a title.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Waiting member
    pub member_id: MemberId,
    /// Reserved title
    pub title_id: TitleId,
    /// Queue ordering key
    pub reserved_at: DateTime<Utc>,
    /// Current status
    pub status: ReservationStatus,
    /// Whether the member has been told a copy was allocated
    pub notified: bool,
    /// When the reservation was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Loan created when the reservation was fulfilled
    pub record_id: Option<RecordId>,
}

impl Reservation {
    /// A new active reservation.
    #[must_use]
    pub fn active(member_id: MemberId, title_id: TitleId, now: DateTime<Utc>) -> Self {
        Self {
            id: ReservationId::new(),
            member_id,
            title_id,
            reserved_at: now,
            status: ReservationStatus::Active,
            notified: false,
            cancelled_at: None,
            record_id: None,
        }
    }

    /// Whether this reservation can still be allocated a copy.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(self.status, ReservationStatus::Active) && !self.notified
    }

    fn ensure_active(&self) -> Result<(), CirculationError> {
        if self.status == ReservationStatus::Active {
            Ok(())
        } else {
            Err(CirculationError::InvalidState(format!(
                "reservation {} is {:?}, expected Active",
                self.id, self.status
            )))
        }
    }

    /// The reservation after cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::InvalidState`] unless the reservation is active.
    pub fn cancel(&self, now: DateTime<Utc>) -> Result<Self, CirculationError> {
        self.ensure_active()?;
        Ok(Self {
            status: ReservationStatus::Cancelled,
            cancelled_at: Some(now),
            ..self.clone()
        })
    }

    /// The reservation after a copy was allocated to it.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::InvalidState`] unless the reservation is active.
    pub fn fulfil(&self, record_id: RecordId) -> Result<Self, CirculationError> {
        self.ensure_active()?;
        Ok(Self {
            status: ReservationStatus::Fulfilled,
            notified: true,
            record_id: Some(record_id),
            ..self.clone()
        })
    }
}

/// Stored entities, for generic persistence helpers and error reporting.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Identifier type
    type Id: Copy + Eq + std::hash::Hash + fmt::Display + Send + Sync + 'static;

    /// Entity kind for errors
    const KIND: EntityKind;

    /// Row identifier
    fn id(&self) -> Self::Id;
}

impl Entity for Title {
    type Id = TitleId;
    const KIND: EntityKind = EntityKind::Title;

    fn id(&self) -> TitleId {
        self.id
    }
}

impl Entity for BorrowRequest {
    type Id = RequestId;
    const KIND: EntityKind = EntityKind::BorrowRequest;

    fn id(&self) -> RequestId {
        self.id
    }
}

impl Entity for BorrowRecord {
    type Id = RecordId;
    const KIND: EntityKind = EntityKind::BorrowRecord;

    fn id(&self) -> RecordId {
        self.id
    }
}

impl Entity for Reservation {
    type Id = ReservationId;
    const KIND: EntityKind = EntityKind::Reservation;

    fn id(&self) -> ReservationId {
        self.id
    }
}
