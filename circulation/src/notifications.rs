//! Notification dispatch.
//!
//! The [`NotificationDispatcher`] runs as its own task, turns committed
//! [`CirculationEvent`]s into [`Notification`]s and hands them to a
//! [`Notifier`]. Delivery failures are logged and counted, never propagated:
//! by the time a notification is sent the change it describes is already
//! committed.

use crate::events::CirculationEvent;
use crate::metrics;
use crate::types::{LoanStatus, MemberId};
use circulation_core::event_bus::{EventBusError, EventStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Who a notification is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    /// A single member
    Member(MemberId),
    /// Library staff as a role
    Staff,
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member(id) => write!(f, "member:{id}"),
            Self::Staff => f.write_str("staff"),
        }
    }
}

/// Notification category, for routing and templates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Borrow request lifecycle
    Request,
    /// Loan issue, renewal and return
    Loan,
    /// Overdue loans
    Overdue,
    /// Fines and payments
    Fine,
    /// Reservation queue
    Reservation,
    /// Something staff must act on
    Alert,
}

/// A message for one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient
    pub recipient: Recipient,
    /// Category
    pub category: Category,
    /// Human-readable text
    pub message: String,
}

impl Notification {
    fn member(member_id: MemberId, category: Category, message: String) -> Self {
        Self {
            recipient: Recipient::Member(member_id),
            category,
            message,
        }
    }

    fn staff(category: Category, message: String) -> Self {
        Self {
            recipient: Recipient::Staff,
            category,
            message,
        }
    }
}

/// Notifier errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The channel refused or failed to deliver the message
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Delivers notifications (e-mail, SMS, push, ...).
///
/// # Dyn Compatibility
///
/// Returns a boxed future so the dispatcher can hold an `Arc<dyn Notifier>`.
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery fails.
    fn notify(&self, notification: Notification) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}

/// Notifier that writes every notification to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                recipient = %notification.recipient,
                category = ?notification.category,
                message = %notification.message,
                "Notification"
            );
            Ok(())
        })
    }
}

/// Notifications owed for one event.
#[must_use]
pub fn notifications_for(event: &CirculationEvent) -> SmallVec<[Notification; 2]> {
    use CirculationEvent as E;

    match event {
        E::BorrowRequested {
            request_id,
            member_id,
            ..
        } => smallvec![Notification::member(
            *member_id,
            Category::Request,
            format!("Your borrow request {request_id} was received and is awaiting approval."),
        )],
        E::RequestApproved {
            member_id, due_at, ..
        } => smallvec![Notification::member(
            *member_id,
            Category::Loan,
            format!("Your borrow request was approved. Please return the book by {}.", due_at.date_naive()),
        )],
        E::RequestRejected {
            member_id, reason, ..
        } => {
            let message = reason.as_deref().map_or_else(
                || "Your borrow request was rejected.".to_string(),
                |reason| format!("Your borrow request was rejected: {reason}"),
            );
            smallvec![Notification::member(*member_id, Category::Request, message)]
        }
        E::LoanRenewed {
            member_id,
            due_at,
            renewals,
            ..
        } => smallvec![Notification::member(
            *member_id,
            Category::Loan,
            format!("Loan renewed ({renewals} so far). New due date: {}.", due_at.date_naive()),
        )],
        E::LoanClosed {
            record_id,
            member_id,
            status,
            fine,
            ..
        } => {
            let mut out: SmallVec<[Notification; 2]> = SmallVec::new();
            let text = if fine.is_zero() {
                "Thank you, your loan is closed.".to_string()
            } else {
                format!("Your loan is closed with a fine of {fine}.")
            };
            out.push(Notification::member(*member_id, Category::Loan, text));
            match status {
                LoanStatus::Damaged => out.push(Notification::staff(
                    Category::Alert,
                    format!("Loan {record_id} was returned damaged."),
                )),
                LoanStatus::Lost => out.push(Notification::staff(
                    Category::Alert,
                    format!("Loan {record_id} was reported lost."),
                )),
                _ => {}
            }
            out
        }
        E::LoanOverdue {
            member_id,
            days_overdue,
            fine,
            ..
        } => smallvec![Notification::member(
            *member_id,
            Category::Overdue,
            format!("Your loan is {days_overdue} day(s) overdue. Current fine: {fine}."),
        )],
        E::FineWaived { member_id, .. } => smallvec![Notification::member(
            *member_id,
            Category::Fine,
            "Your fine has been waived.".to_string(),
        )],
        E::FinePaid {
            member_id, amount, ..
        } => smallvec![Notification::member(
            *member_id,
            Category::Fine,
            format!("Payment of {amount} received. Thank you."),
        )],
        E::FineReminder {
            member_id, fine, ..
        } => smallvec![Notification::member(
            *member_id,
            Category::Fine,
            format!("Reminder: you have an outstanding fine of {fine} on an overdue loan."),
        )],
        E::ReservationPlaced {
            member_id, position, ..
        } => smallvec![Notification::member(
            *member_id,
            Category::Reservation,
            format!("Reservation placed. You are number {position} in the queue."),
        )],
        E::ReservationCancelled { member_id, .. } => smallvec![Notification::member(
            *member_id,
            Category::Reservation,
            "Your reservation was cancelled.".to_string(),
        )],
        E::ReservationFulfilled {
            member_id, due_at, ..
        } => smallvec![Notification::member(
            *member_id,
            Category::Reservation,
            format!("A reserved book is now on loan to you. Due {}.", due_at.date_naive()),
        )],
        E::StockAdjusted { .. } => SmallVec::new(),
    }
}

/// Delivery counts for a dispatcher run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Notifications delivered
    pub delivered: usize,
    /// Notifications that failed and were dropped
    pub failed: usize,
    /// Events missed because the dispatcher fell behind
    pub lagged: u64,
}

/// Consumes circulation events and sends the matching notifications.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher delivering through `notifier`
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Send every notification owed for `event`, swallowing failures.
    pub async fn dispatch(&self, event: &CirculationEvent) -> DispatchStats {
        let mut stats = DispatchStats::default();
        for notification in notifications_for(event) {
            let recipient = notification.recipient;
            match self.notifier.notify(notification).await {
                Ok(()) => stats.delivered += 1,
                Err(error) => {
                    stats.failed += 1;
                    metrics::record_notification_failed();
                    tracing::warn!(
                        event = event.name(),
                        %recipient,
                        %error,
                        "Notification failed, dropping"
                    );
                }
            }
        }
        stats
    }

    /// Run until `events` ends or `shutdown` fires.
    ///
    /// Subscribe before spawning so no event committed in between is missed.
    pub fn spawn(
        self,
        mut events: EventStream<CirculationEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<DispatchStats> {
        tokio::spawn(async move {
            let mut totals = DispatchStats::default();
            tracing::info!("Notification dispatcher started");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Notification dispatcher received shutdown signal");
                        break;
                    }
                    next = events.next() => match next {
                        Some(Ok(event)) => {
                            let stats = self.dispatch(&event).await;
                            totals.delivered += stats.delivered;
                            totals.failed += stats.failed;
                        }
                        Some(Err(EventBusError::Lagged { skipped })) => {
                            totals.lagged += skipped;
                            tracing::warn!(skipped, "Notification dispatcher lagged, events skipped");
                        }
                        Some(Err(error)) => {
                            tracing::warn!(%error, "Notification dispatcher stream error");
                        }
                        None => break,
                    },
                }
            }

            tracing::info!(
                delivered = totals.delivered,
                failed = totals.failed,
                lagged = totals.lagged,
                "Notification dispatcher stopped"
            );
            totals
        })
    }
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher").finish_non_exhaustive()
    }
}
