//! Daily background jobs: the overdue sweep and fine reminders.
//!
//! Each job runs in its own task, sleeps until its configured UTC hour, runs,
//! and goes back to sleep. A job failure is logged and the job waits for its
//! next slot. All tasks stop when the shutdown channel fires.

use crate::config::SchedulerConfig;
use crate::fines::FineEngine;
use chrono::{DateTime, Duration, Utc};
use circulation_core::environment::Clock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A job the scheduler runs once a day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DailyJob {
    /// [`FineEngine::process_overdue_sweep`]
    OverdueSweep,
    /// [`FineEngine::send_fine_reminders`]
    FineReminders,
}

impl DailyJob {
    const fn name(self) -> &'static str {
        match self {
            Self::OverdueSweep => "overdue_sweep",
            Self::FineReminders => "fine_reminders",
        }
    }
}

/// Time from `now` until the next `hour:00` UTC, strictly in the future.
#[must_use]
pub fn delay_until_hour(now: DateTime<Utc>, hour: u32) -> Duration {
    let Some(today) = now.date_naive().and_hms_opt(hour.min(23), 0, 0) else {
        return Duration::days(1);
    };
    let mut next = today.and_utc();
    if next <= now {
        next += Duration::days(1);
    }
    next - now
}

/// Runs the daily jobs against a [`FineEngine`].
#[derive(Clone)]
pub struct SweepScheduler {
    fines: FineEngine,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl SweepScheduler {
    /// Creates a scheduler
    #[must_use]
    pub fn new(fines: FineEngine, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            fines,
            clock,
            config,
        }
    }

    /// Configured UTC hour for `job`.
    #[must_use]
    pub const fn hour_for(&self, job: DailyJob) -> u32 {
        match job {
            DailyJob::OverdueSweep => self.config.overdue_sweep_hour,
            DailyJob::FineReminders => self.config.fine_reminder_hour,
        }
    }

    /// Run `job` once, now.
    pub async fn run_job(&self, job: DailyJob) {
        tracing::info!(job = job.name(), "Running scheduled job");
        match job {
            DailyJob::OverdueSweep => {
                if let Err(error) = self.fines.process_overdue_sweep().await {
                    tracing::error!(job = job.name(), %error, "Scheduled job failed");
                }
            }
            DailyJob::FineReminders => {
                if let Err(error) = self.fines.send_fine_reminders().await {
                    tracing::error!(job = job.name(), %error, "Scheduled job failed");
                }
            }
        }
    }

    /// Start one task per job. Every task stops when `shutdown` fires.
    #[must_use]
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        [DailyJob::OverdueSweep, DailyJob::FineReminders]
            .into_iter()
            .map(|job| {
                let scheduler = self.clone();
                let shutdown = shutdown.subscribe();
                tokio::spawn(async move { scheduler.run_daily(job, shutdown).await })
            })
            .collect()
    }

    async fn run_daily(&self, job: DailyJob, mut shutdown: broadcast::Receiver<()>) {
        let hour = self.hour_for(job);
        tracing::info!(job = job.name(), hour, "Daily job scheduled");

        loop {
            let delay = delay_until_hour(self.clock.now(), hour)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(3600));
            tracing::debug!(job = job.name(), delay_secs = delay.as_secs(), "Sleeping until next run");

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(job = job.name(), "Daily job received shutdown signal");
                    break;
                }
                () = tokio::time::sleep(delay) => {
                    self.run_job(job).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for SweepScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
