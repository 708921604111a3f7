//! # Circulation Testing
//!
//! Testing utilities and helpers for the library circulation crates.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - An event bus that records everything published ([`RecordingEventBus`])
//! - Tracing setup for tests that want log output
//!
//! ## Example
//!
//! ```
//! use circulation_testing::{ManualClock, test_clock};
//! use circulation_core::environment::Clock;
//! use chrono::Duration;
//!
//! let clock = ManualClock::new(test_clock().now());
//! let start = clock.now();
//! clock.advance(Duration::days(3));
//! assert_eq!(clock.now() - start, Duration::days(3));
//! ```

use chrono::{DateTime, Utc};
use circulation_core::environment::Clock;

/// Clocks and buses standing in for the real environment.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use circulation_core::event_bus::{BroadcastEventBus, EventBus, EventBusError, EventStream};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Mutex, PoisonError, RwLock};

    /// Clock frozen at one instant.
    ///
    /// ```
    /// use circulation_testing::mocks::FixedClock;
    /// use circulation_core::environment::Clock;
    /// use chrono::{TimeZone, Utc};
    ///
    /// let opening_day = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
    /// let clock = FixedClock::new(opening_day);
    /// assert_eq!(clock.now(), opening_day);
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FixedClock(DateTime<Utc>);

    impl FixedClock {
        /// Freeze time at `at`.
        #[must_use]
        pub const fn new(at: DateTime<Utc>) -> Self {
            Self(at)
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Share it between the system under test and the test body via `Arc` and
    /// call [`ManualClock::advance`] to let days pass.
    #[derive(Debug)]
    pub struct ManualClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Move the clock forward (or backward, for a negative duration).
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// The instant every test starts from: midnight UTC, 1 January 2025.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }

    /// Event bus that keeps a copy of every published event.
    ///
    /// Subscriptions behave like [`BroadcastEventBus`]; [`RecordingEventBus::published`]
    /// returns the full history regardless of subscribers.
    #[derive(Debug)]
    pub struct RecordingEventBus<E> {
        inner: BroadcastEventBus<E>,
        published: Mutex<Vec<E>>,
    }

    impl<E> RecordingEventBus<E>
    where
        E: Clone + Send + 'static,
    {
        /// Create an empty recording bus.
        #[must_use]
        pub fn new() -> Self {
            Self {
                inner: BroadcastEventBus::new(1024),
                published: Mutex::new(Vec::new()),
            }
        }

        /// Everything published so far, in publish order.
        #[must_use]
        pub fn published(&self) -> Vec<E> {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Forget the recorded history.
        pub fn clear(&self) {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    impl<E> Default for RecordingEventBus<E>
    where
        E: Clone + Send + 'static,
    {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<E> EventBus<E> for RecordingEventBus<E>
    where
        E: Clone + Send + 'static,
    {
        fn publish(
            &self,
            event: E,
        ) -> Pin<Box<dyn Future<Output = Result<usize, EventBusError>> + Send + '_>> {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
            self.inner.publish(event)
        }

        fn subscribe(&self) -> EventStream<E> {
            self.inner.subscribe()
        }
    }
}

/// Test setup helpers.
pub mod helpers {
    /// Install a `tracing` subscriber for test output.
    ///
    /// Honors `RUST_LOG`; safe to call from every test (only the first call
    /// installs anything).
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

pub use helpers::init_test_tracing;
pub use mocks::{FixedClock, ManualClock, RecordingEventBus, test_clock};
