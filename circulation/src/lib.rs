//! # Library Circulation
//!
//! Transactional core of a library's circulation desk: borrow requests and
//! approvals, loans with renewals and fines, per-title copy inventory, FIFO
//! reservation queues, a daily overdue sweep and post-commit notifications.
//!
//! ## Architecture
//!
//! - [`types`]: entities and their pure state transitions
//! - [`store`]: versioned persistence with atomic units of work
//! - [`inventory`], [`plans`], [`borrow`], [`fines`], [`reservations`]: the
//!   components; each reads, computes, commits and retries on conflict
//! - [`events`] and [`notifications`]: facts published after commit and the
//!   dispatcher that turns them into messages
//! - [`scheduler`]: daily overdue sweep and fine reminders
//! - [`app`]: wires everything over one [`environment::CirculationEnvironment`]
//!
//! ## Concurrency
//!
//! Every state change is an optimistic unit of work: rows are read with their
//! version, the next rows are computed, and the store applies all writes only if
//! no row moved in between. A lost race is retried from fresh reads, so two
//! approvals for the last copy never both succeed.

pub mod app;
pub mod borrow;
pub mod config;
pub mod environment;
pub mod error;
pub mod events;
pub mod fines;
pub mod inventory;
pub mod metrics;
pub mod notifications;
pub mod plans;
pub mod reservations;
pub mod scheduler;
pub mod store;
pub mod types;

pub use app::Circulation;
pub use error::{CirculationError, StoreError};
