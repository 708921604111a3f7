//! Persistence seam for circulation state.
//!
//! A [`CirculationStore`] hands out versioned rows and applies a [`UnitOfWork`]
//! atomically: either every write and guard in the unit checks out against the
//! current versions and all writes are applied, or nothing is applied and
//! [`StoreError::Conflict`](crate::error::StoreError::Conflict) is returned.
//!
//! Services never mutate rows in place. They read, compute the next rows with
//! the pure transitions in [`crate::types`], stage them in a unit of work and
//! commit. Conflicts are retried from fresh reads by the caller.

mod memory;

pub use memory::InMemoryStore;

use crate::error::StoreError;
use crate::types::{
    BorrowRecord, BorrowRequest, Entity, LoanStatus, Member, MemberId, MembershipPlan, PlanId,
    RecordId, RequestId, RequestStatus, Reservation, ReservationId, ReservationStatus, Title,
    TitleId,
};
use circulation_core::version::{Version, Versioned};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Transactional store for titles, members, plans, requests, records and
/// reservations.
///
/// Query methods return rows in creation order.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so services can hold an
/// `Arc<dyn CirculationStore>`.
pub trait CirculationStore: Send + Sync {
    /// Load a title.
    fn title(&self, id: TitleId) -> StoreFuture<'_, Option<Versioned<Title>>>;

    /// Load a member. The member's version moves whenever one of their
    /// records or reservations is written.
    fn member(&self, id: MemberId) -> StoreFuture<'_, Option<Versioned<Member>>>;

    /// Load a membership plan.
    fn plan(&self, id: PlanId) -> StoreFuture<'_, Option<MembershipPlan>>;

    /// Load a borrow request.
    fn request(&self, id: RequestId) -> StoreFuture<'_, Option<Versioned<BorrowRequest>>>;

    /// Load a borrow record.
    fn record(&self, id: RecordId) -> StoreFuture<'_, Option<Versioned<BorrowRecord>>>;

    /// Load a reservation.
    fn reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Versioned<Reservation>>>;

    /// Borrow requests matching `filter`.
    fn requests(&self, filter: RequestFilter) -> StoreFuture<'_, Vec<Versioned<BorrowRequest>>>;

    /// Borrow records matching `filter`.
    fn records(&self, filter: RecordFilter) -> StoreFuture<'_, Vec<Versioned<BorrowRecord>>>;

    /// Reservations matching `filter`.
    fn reservations(&self, filter: ReservationFilter) -> StoreFuture<'_, Vec<Versioned<Reservation>>>;

    /// Apply every staged write, or none of them.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] if any write or guard finds a different version
    /// - [`StoreError::Constraint`] if a write would break a stored invariant
    fn commit(&self, unit: UnitOfWork) -> StoreFuture<'_, ()>;
}

// ============================================================================
// Query filters
// ============================================================================

/// Selects borrow requests. Empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    /// Only this member's requests
    pub member_id: Option<MemberId>,
    /// Only requests with one of these statuses
    pub statuses: Vec<RequestStatus>,
}

impl RequestFilter {
    /// Requests by one member.
    #[must_use]
    pub fn for_member(member_id: MemberId) -> Self {
        Self {
            member_id: Some(member_id),
            ..Self::default()
        }
    }

    /// Requests in one status.
    #[must_use]
    pub fn with_status(status: RequestStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    /// Whether `request` passes the filter.
    #[must_use]
    pub fn matches(&self, request: &BorrowRequest) -> bool {
        self.member_id.is_none_or(|id| id == request.member_id)
            && (self.statuses.is_empty() || self.statuses.contains(&request.status))
    }
}

/// Selects borrow records. Empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Only this member's records
    pub member_id: Option<MemberId>,
    /// Only records for this title
    pub title_id: Option<TitleId>,
    /// Only records with one of these statuses
    pub statuses: Vec<LoanStatus>,
}

impl RecordFilter {
    /// Records of one member.
    #[must_use]
    pub fn for_member(member_id: MemberId) -> Self {
        Self {
            member_id: Some(member_id),
            ..Self::default()
        }
    }

    /// Loans still out (`Borrowed` or `Overdue`).
    #[must_use]
    pub fn active() -> Self {
        Self {
            statuses: LoanStatus::ACTIVE.to_vec(),
            ..Self::default()
        }
    }

    /// Records in the given statuses.
    #[must_use]
    pub fn with_statuses(statuses: &[LoanStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    /// Narrow to one member.
    #[must_use]
    pub const fn member(mut self, member_id: MemberId) -> Self {
        self.member_id = Some(member_id);
        self
    }

    /// Whether `record` passes the filter.
    #[must_use]
    pub fn matches(&self, record: &BorrowRecord) -> bool {
        self.member_id.is_none_or(|id| id == record.member_id)
            && self.title_id.is_none_or(|id| id == record.title_id)
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
    }
}

/// Selects reservations. Empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    /// Only this member's reservations
    pub member_id: Option<MemberId>,
    /// Only reservations for this title
    pub title_id: Option<TitleId>,
    /// Only reservations with one of these statuses
    pub statuses: Vec<ReservationStatus>,
}

impl ReservationFilter {
    /// Active reservations for a title.
    #[must_use]
    pub fn active_for_title(title_id: TitleId) -> Self {
        Self {
            title_id: Some(title_id),
            statuses: vec![ReservationStatus::Active],
            ..Self::default()
        }
    }

    /// Reservations by one member.
    #[must_use]
    pub fn for_member(member_id: MemberId) -> Self {
        Self {
            member_id: Some(member_id),
            ..Self::default()
        }
    }

    /// Whether `reservation` passes the filter.
    #[must_use]
    pub fn matches(&self, reservation: &Reservation) -> bool {
        self.member_id.is_none_or(|id| id == reservation.member_id)
            && self.title_id.is_none_or(|id| id == reservation.title_id)
            && (self.statuses.is_empty() || self.statuses.contains(&reservation.status))
    }
}

// ============================================================================
// Unit of work
// ============================================================================

/// One staged row write.
///
/// `expected` is the version the writer read; `None` stages an insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Write<T> {
    /// New row contents
    pub value: T,
    /// Version the row must still be at, or `None` for a new row
    pub expected: Option<Version>,
}

impl<T: Entity> Write<T> {
    /// Row identifier.
    pub fn id(&self) -> T::Id {
        self.value.id()
    }
}

/// A staged change to one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// Title counters
    Title(Write<Title>),
    /// Borrow request
    Request(Write<BorrowRequest>),
    /// Borrow record
    Record(Write<BorrowRecord>),
    /// Reservation
    Reservation(Write<Reservation>),
}

/// A read that must still hold at commit time, without writing the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Guard {
    /// The member's records and reservations are unchanged since `version`
    Member {
        /// Guarded member
        member_id: MemberId,
        /// Member version observed by the reader
        version: Version,
    },
}

/// Writes and guards applied together by [`CirculationStore::commit`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    changes: Vec<Change>,
    guards: Vec<Guard>,
}

impl UnitOfWork {
    /// An empty unit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a title update against the version it was read at.
    #[must_use]
    pub fn update_title(mut self, title: Title, expected: Version) -> Self {
        self.changes.push(Change::Title(Write {
            value: title,
            expected: Some(expected),
        }));
        self
    }

    /// Stage a new borrow request.
    #[must_use]
    pub fn insert_request(mut self, request: BorrowRequest) -> Self {
        self.changes.push(Change::Request(Write {
            value: request,
            expected: None,
        }));
        self
    }

    /// Stage a borrow request update.
    #[must_use]
    pub fn update_request(mut self, request: BorrowRequest, expected: Version) -> Self {
        self.changes.push(Change::Request(Write {
            value: request,
            expected: Some(expected),
        }));
        self
    }

    /// Stage a new borrow record.
    #[must_use]
    pub fn insert_record(mut self, record: BorrowRecord) -> Self {
        self.changes.push(Change::Record(Write {
            value: record,
            expected: None,
        }));
        self
    }

    /// Stage a borrow record update.
    #[must_use]
    pub fn update_record(mut self, record: BorrowRecord, expected: Version) -> Self {
        self.changes.push(Change::Record(Write {
            value: record,
            expected: Some(expected),
        }));
        self
    }

    /// Stage a new reservation.
    #[must_use]
    pub fn insert_reservation(mut self, reservation: Reservation) -> Self {
        self.changes.push(Change::Reservation(Write {
            value: reservation,
            expected: None,
        }));
        self
    }

    /// Stage a reservation update.
    #[must_use]
    pub fn update_reservation(mut self, reservation: Reservation, expected: Version) -> Self {
        self.changes.push(Change::Reservation(Write {
            value: reservation,
            expected: Some(expected),
        }));
        self
    }

    /// Require the member to be unchanged since it was read at `version`.
    #[must_use]
    pub fn guard_member(mut self, member_id: MemberId, version: Version) -> Self {
        self.guards.push(Guard::Member { member_id, version });
        self
    }

    /// Staged changes, in staging order.
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Staged guards.
    #[must_use]
    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
