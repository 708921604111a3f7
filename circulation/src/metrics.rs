//! Business metrics for library circulation.
//!
//! Metrics go through the `metrics` facade; the binary decides whether and
//! where they are exported.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `circulation_requests_total{status}` - Borrow requests by outcome (submitted, approved, rejected)
//! - `circulation_loans_closed_total{status}` - Loans closed by terminal status
//! - `circulation_renewals_total` - Successful renewals
//! - `circulation_overdue_marked_total` - Loans tagged overdue by the sweep
//! - `circulation_fines_assessed_minor_total` - Fines assessed at return, in minor units
//! - `circulation_fines_settled_total{method}` - Fines cleared (waived, offline)
//! - `circulation_reservations_total{status}` - Reservations by outcome (placed, cancelled, fulfilled)
//! - `circulation_commit_conflicts_total{operation}` - Version conflicts hit by units of work
//! - `circulation_notifications_failed_total` - Notifier failures swallowed by the dispatcher
//!
//! ## Histograms
//! - `circulation_sweep_duration_seconds` - Overdue sweep run time

use crate::types::{LoanStatus, Money};
use metrics::{describe_counter, describe_histogram};

/// Initialize and register all business metric descriptions.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "circulation_requests_total",
        "Borrow requests by outcome (submitted, approved, rejected)"
    );
    describe_counter!(
        "circulation_loans_closed_total",
        "Loans closed, by terminal status (returned, damaged, lost)"
    );
    describe_counter!("circulation_renewals_total", "Successful loan renewals");
    describe_counter!(
        "circulation_overdue_marked_total",
        "Loans tagged overdue by the daily sweep"
    );
    describe_counter!(
        "circulation_fines_assessed_minor_total",
        "Fines assessed at return time, in minor currency units"
    );
    describe_counter!(
        "circulation_fines_settled_total",
        "Fines cleared, by method (waived, offline)"
    );
    describe_counter!(
        "circulation_reservations_total",
        "Reservations by outcome (placed, cancelled, fulfilled)"
    );
    describe_counter!(
        "circulation_commit_conflicts_total",
        "Units of work rejected by a version conflict, by operation"
    );
    describe_counter!(
        "circulation_notifications_failed_total",
        "Notification deliveries that failed and were dropped"
    );
    describe_histogram!(
        "circulation_sweep_duration_seconds",
        "Time taken by one overdue sweep"
    );

    tracing::info!("Business metrics registered");
}

/// Record a borrow request outcome (`submitted`, `approved` or `rejected`).
pub fn record_request(status: &'static str) {
    metrics::counter!("circulation_requests_total", "status" => status).increment(1);
    tracing::debug!(status, "Recorded request metric");
}

/// Record a loan reaching a terminal status, with the fine assessed.
pub fn record_loan_closed(status: LoanStatus, fine: Money) {
    let label = match status {
        LoanStatus::Damaged => "damaged",
        LoanStatus::Lost => "lost",
        _ => "returned",
    };
    metrics::counter!("circulation_loans_closed_total", "status" => label).increment(1);
    metrics::counter!("circulation_fines_assessed_minor_total").increment(fine.minor());
    tracing::debug!(status = label, fine = %fine, "Recorded loan_closed metric");
}

/// Record a successful renewal.
pub fn record_renewal() {
    metrics::counter!("circulation_renewals_total").increment(1);
}

/// Record loans newly tagged overdue by one sweep, and its duration.
pub fn record_sweep(marked_overdue: usize, duration_secs: f64) {
    metrics::counter!("circulation_overdue_marked_total")
        .increment(u64::try_from(marked_overdue).unwrap_or(u64::MAX));
    metrics::histogram!("circulation_sweep_duration_seconds").record(duration_secs);
    tracing::debug!(marked_overdue, duration_secs, "Recorded sweep metric");
}

/// Record a fine cleared by `method` (`waived` or `offline`).
pub fn record_fine_settled(method: &'static str) {
    metrics::counter!("circulation_fines_settled_total", "method" => method).increment(1);
}

/// Record a reservation outcome (`placed`, `cancelled` or `fulfilled`).
pub fn record_reservation(status: &'static str) {
    metrics::counter!("circulation_reservations_total", "status" => status).increment(1);
    tracing::debug!(status, "Recorded reservation metric");
}

/// Record a version conflict hit by `operation`.
pub fn record_commit_conflict(operation: &'static str) {
    metrics::counter!("circulation_commit_conflicts_total", "operation" => operation).increment(1);
}

/// Record a notification the dispatcher had to drop.
pub fn record_notification_failed() {
    metrics::counter!("circulation_notifications_failed_total").increment(1);
}
