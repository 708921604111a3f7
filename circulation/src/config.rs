//! Configuration management for the circulation service.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::types::Money;
use circulation_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Borrowing and fine policy
    pub policy: PolicyConfig,
    /// Optimistic-commit retry settings
    pub concurrency: ConcurrencyConfig,
    /// Daily background jobs
    pub scheduler: SchedulerConfig,
    /// In-process event bus
    pub events: EventBusConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// System-wide borrowing policy. Plan-specific values win over these.
///
/// The renewal cap is not configurable; see [`crate::types::MAX_RENEWALS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Loan period when the member has no plan (default: 14 days)
    pub default_borrow_days: u32,
    /// Renewal extension when the member has no plan (default: 7 days)
    pub default_renewal_days: u32,
    /// Per-day overdue fine when no plan rate applies (default: 10.00)
    pub default_fine_per_day: Money,
    /// Flat fine for a copy returned damaged (default: 200.00)
    pub damage_fine: Money,
    /// Flat fine for a lost copy (default: 500.00)
    pub lost_fine: Money,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_borrow_days: 14,
            default_renewal_days: 7,
            default_fine_per_day: Money::units(10),
            damage_fine: Money::units(200),
            lost_fine: Money::units(500),
        }
    }
}

/// Retry settings for units of work that lose a version race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConcurrencyConfig {
    /// Backoff applied between attempts
    pub retry: RetryPolicy,
}

/// Daily job schedule, in UTC hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the binary starts the daily jobs (default: true)
    pub enabled: bool,
    /// Hour of the overdue sweep (default: 2)
    pub overdue_sweep_hour: u32,
    /// Hour of the fine reminder run (default: 9)
    pub fine_reminder_hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overdue_sweep_hour: 2,
            fine_reminder_hour: 9,
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Events buffered per subscriber before it starts lagging (default: 1024)
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset (default: "info")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults. Hours are
    /// clamped to `0..=23`.
    #[must_use]
    pub fn from_env() -> Self {
        let policy = PolicyConfig::default();
        let retry = RetryPolicy::default();
        let scheduler = SchedulerConfig::default();

        Self {
            policy: PolicyConfig {
                default_borrow_days: var_or("BORROW_DAYS", policy.default_borrow_days),
                default_renewal_days: var_or("RENEWAL_DAYS", policy.default_renewal_days),
                default_fine_per_day: Money::units(var_or("FINE_PER_DAY_UNITS", 10)),
                damage_fine: Money::units(var_or("FINE_DAMAGE_UNITS", 200)),
                lost_fine: Money::units(var_or("FINE_LOST_UNITS", 500)),
            },
            concurrency: ConcurrencyConfig {
                retry: RetryPolicy::builder()
                    .max_retries(var_or("COMMIT_MAX_RETRIES", retry.max_retries))
                    .initial_delay(Duration::from_millis(var_or("COMMIT_RETRY_INITIAL_MS", 1)))
                    .max_delay(Duration::from_millis(var_or("COMMIT_RETRY_MAX_MS", 50)))
                    .build(),
            },
            scheduler: SchedulerConfig {
                enabled: var_or("SCHEDULER_ENABLED", scheduler.enabled),
                overdue_sweep_hour: var_or("OVERDUE_SWEEP_HOUR", scheduler.overdue_sweep_hour).min(23),
                fine_reminder_hour: var_or("FINE_REMINDER_HOUR", scheduler.fine_reminder_hour).min(23),
            },
            events: EventBusConfig {
                capacity: var_or("EVENT_BUS_CAPACITY", EventBusConfig::default().capacity),
            },
            logging: LoggingConfig {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
        }
    }
}
