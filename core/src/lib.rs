//! # Circulation Core
//!
//! Building blocks shared by the library circulation crates.
//!
//! The circulation domain itself lives in the `circulation` crate. This crate holds
//! the pieces that have nothing library-specific about them:
//!
//! - [`environment`]: the [`Clock`](environment::Clock) abstraction so every
//!   time-dependent rule (due dates, fines, the overdue sweep) can run against
//!   injected time
//! - [`version`]: row [`Version`](version::Version) stamps used for optimistic
//!   concurrency
//! - [`retry`]: bounded retry with exponential backoff, used to re-run a unit of
//!   work after a version conflict
//! - [`event_bus`]: in-process publish/subscribe for domain events
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell: state transitions are pure functions,
//!   services load rows, apply transitions and commit the result
//! - Explicit side effects: notifications are driven by published events, never
//!   sent inline with a state change
//! - Dependency injection: clocks, stores and buses are passed in as trait objects

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod event_bus;
pub mod retry;
pub mod version;

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// at construction time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use circulation_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
