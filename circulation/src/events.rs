//! Domain events published after each committed circulation change.
//!
//! Events describe facts that already happened. They are published to the
//! [`EventBus`](circulation_core::event_bus::EventBus) only once the unit of
//! work behind them has been committed; consumers such as the
//! [`NotificationDispatcher`](crate::notifications::NotificationDispatcher)
//! react to them asynchronously.

use crate::types::{
    LoanStatus, MemberId, Money, RecordId, RequestId, ReservationId, ReturnCondition, TitleId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything circulation announces to the outside world.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CirculationEvent {
    /// A member asked to borrow a title
    BorrowRequested {
        /// New request
        request_id: RequestId,
        /// Requesting member
        member_id: MemberId,
        /// Requested title
        title_id: TitleId,
    },

    /// Staff approved a request and a loan was opened
    RequestApproved {
        /// Approved request
        request_id: RequestId,
        /// Loan opened for it
        record_id: RecordId,
        /// Borrowing member
        member_id: MemberId,
        /// Borrowed title
        title_id: TitleId,
        /// Due date of the new loan
        due_at: DateTime<Utc>,
    },

    /// Staff rejected a request
    RequestRejected {
        /// Rejected request
        request_id: RequestId,
        /// Requesting member
        member_id: MemberId,
        /// Requested title
        title_id: TitleId,
        /// Reason given by staff
        reason: Option<String>,
    },

    /// A loan's due date was extended
    LoanRenewed {
        /// Renewed loan
        record_id: RecordId,
        /// Borrowing member
        member_id: MemberId,
        /// New due date
        due_at: DateTime<Utc>,
        /// Renewals used so far
        renewals: u32,
    },

    /// A loan was closed by return or loss report
    LoanClosed {
        /// Closed loan
        record_id: RecordId,
        /// Borrowing member
        member_id: MemberId,
        /// Returned title
        title_id: TitleId,
        /// Terminal status
        status: LoanStatus,
        /// Fine assessed
        fine: Money,
        /// Damage or loss, if reported
        condition: Option<ReturnCondition>,
    },

    /// The sweep tagged a loan overdue
    LoanOverdue {
        /// Overdue loan
        record_id: RecordId,
        /// Borrowing member
        member_id: MemberId,
        /// Borrowed title
        title_id: TitleId,
        /// Whole days past due
        days_overdue: i64,
        /// Fine accrued so far
        fine: Money,
    },

    /// Staff waived a fine
    FineWaived {
        /// Loan whose fine was waived
        record_id: RecordId,
        /// Borrowing member
        member_id: MemberId,
    },

    /// Staff recorded an in-person payment
    FinePaid {
        /// Loan whose fine was paid
        record_id: RecordId,
        /// Borrowing member
        member_id: MemberId,
        /// Amount collected
        amount: Money,
        /// Staff member who collected it
        collected_by: String,
    },

    /// Reminder for an outstanding fine on an overdue loan
    FineReminder {
        /// Overdue loan
        record_id: RecordId,
        /// Borrowing member
        member_id: MemberId,
        /// Borrowed title
        title_id: TitleId,
        /// Amount outstanding
        fine: Money,
    },

    /// A member joined a title's waitlist
    ReservationPlaced {
        /// New reservation
        reservation_id: ReservationId,
        /// Waiting member
        member_id: MemberId,
        /// Reserved title
        title_id: TitleId,
        /// Position in the queue, starting at 1
        position: usize,
    },

    /// A reservation was withdrawn
    ReservationCancelled {
        /// Cancelled reservation
        reservation_id: ReservationId,
        /// Waiting member
        member_id: MemberId,
        /// Reserved title
        title_id: TitleId,
    },

    /// A returned copy was allocated to a waiting member
    ReservationFulfilled {
        /// Fulfilled reservation
        reservation_id: ReservationId,
        /// Loan opened for it
        record_id: RecordId,
        /// Member who received the copy
        member_id: MemberId,
        /// Allocated title
        title_id: TitleId,
        /// Due date of the new loan
        due_at: DateTime<Utc>,
    },

    /// A title's counters changed outside a loan (manual reserve or release)
    StockAdjusted {
        /// Adjusted title
        title_id: TitleId,
        /// Copies on the shelf after the change
        available_copies: u32,
        /// Copies owned
        total_copies: u32,
    },
}

impl CirculationEvent {
    /// Event name, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BorrowRequested { .. } => "BorrowRequested",
            Self::RequestApproved { .. } => "RequestApproved",
            Self::RequestRejected { .. } => "RequestRejected",
            Self::LoanRenewed { .. } => "LoanRenewed",
            Self::LoanClosed { .. } => "LoanClosed",
            Self::LoanOverdue { .. } => "LoanOverdue",
            Self::FineWaived { .. } => "FineWaived",
            Self::FinePaid { .. } => "FinePaid",
            Self::FineReminder { .. } => "FineReminder",
            Self::ReservationPlaced { .. } => "ReservationPlaced",
            Self::ReservationCancelled { .. } => "ReservationCancelled",
            Self::ReservationFulfilled { .. } => "ReservationFulfilled",
            Self::StockAdjusted { .. } => "StockAdjusted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_variant_tag() {
        let event = CirculationEvent::FineWaived {
            record_id: RecordId::new(),
            member_id: MemberId::new(),
        };
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert!(json.get("FineWaived").is_some());
        assert_eq!(event.name(), "FineWaived");
    }
}
