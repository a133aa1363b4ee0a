use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::watch::Watch;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const MIN_SLEEP_SECS: u64 = 1;
const MAX_SLEEP_SECS: u64 = 600;
const IDLE_SLEEP_SECS: u64 = 60;
const STOP_TIMEOUT_SECS: u64 = 5;

/// The slice of a watch the scheduler needs. The worker publishes these
/// through a `watch` channel whenever they change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub url: String,
    pub enabled: bool,
    pub interval_secs: u64,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl From<&Watch> for ScheduleEntry {
    fn from(watch: &Watch) -> Self {
        Self {
            url: watch.url.clone(),
            enabled: watch.enabled,
            interval_secs: watch.interval_secs,
            last_checked_at: watch.last_checked_at,
        }
    }
}

impl ScheduleEntry {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        is_due(self.enabled, self.interval_secs, self.last_checked_at, now)
    }

    /// Milliseconds until due; zero or negative once due.
    fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        match self.last_checked_at {
            Some(last) => interval_ms(self.interval_secs) - (now - last).num_milliseconds(),
            None => 0,
        }
    }
}

/// A never-checked watch is due at once; the boundary `elapsed == interval`
/// is due.
pub fn is_due(
    enabled: bool,
    interval_secs: u64,
    last_checked_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if !enabled {
        return false;
    }
    match last_checked_at {
        Some(last) => (now - last).num_milliseconds() >= interval_ms(interval_secs),
        None => true,
    }
}

fn interval_ms(interval_secs: u64) -> i64 {
    i64::try_from(interval_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: Vec<String>,
    /// Enabled but not yet due.
    pub skipped: Vec<String>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.due.is_empty() && self.skipped.is_empty()
    }
}

pub fn plan(entries: &[ScheduleEntry], now: DateTime<Utc>) -> TickReport {
    let mut report = TickReport::default();
    for entry in entries.iter().filter(|entry| entry.enabled) {
        if entry.is_due(now) {
            report.due.push(entry.url.clone());
        } else {
            report.skipped.push(entry.url.clone());
        }
    }
    report
}

/// Time until the nearest enabled watch becomes due, bounded to
/// `[1s, 600s]`. Overdue watches are already queued and do not shorten the
/// sleep; when every enabled watch is overdue the loop polls each second.
pub fn next_sleep(entries: &[ScheduleEntry], now: DateTime<Utc>) -> Duration {
    let mut enabled = entries.iter().filter(|entry| entry.enabled).peekable();
    if enabled.peek().is_none() {
        return Duration::from_secs(IDLE_SLEEP_SECS);
    }

    let nearest_ms = enabled
        .map(|entry| entry.remaining_ms(now))
        .filter(|remaining| *remaining > 0)
        .min();

    let secs = match nearest_ms {
        Some(ms) => u64::try_from((ms + 999) / 1000).unwrap_or(MAX_SLEEP_SECS),
        None => MIN_SLEEP_SECS,
    };
    Duration::from_secs(secs.clamp(MIN_SLEEP_SECS, MAX_SLEEP_SECS))
}

/// Ticks over the latest schedule snapshot and hands each report to
/// `on_tick`, which returns `false` once the receiving side is gone.
/// Wakes early on cancellation or when the snapshot changes.
pub async fn scheduler_loop<F>(
    mut schedule: watch::Receiver<Vec<ScheduleEntry>>,
    mut on_tick: F,
    cancel_token: CancellationToken,
) where
    F: FnMut(TickReport) -> bool + Send,
{
    log_info!("scheduler loop started");

    loop {
        let now = Utc::now();
        let (report, sleep_for) = {
            let entries = schedule.borrow_and_update();
            (plan(&entries, now), next_sleep(&entries, now))
        };

        if !report.is_empty() {
            log_debug!(
                "tick: {} due, {} not due, next tick in {}s",
                report.due.len(),
                report.skipped.len(),
                sleep_for.as_secs()
            );
            if !on_tick(report) {
                log_warn!("monitor worker gone, scheduler loop exiting");
                break;
            }
        }

        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("scheduler loop shutting down");
                break;
            }
            _ = tokio::time::sleep(sleep_for) => {}
            changed = schedule.changed() => {
                if changed.is_err() {
                    log_warn!("schedule publisher dropped, scheduler loop exiting");
                    break;
                }
            }
        }
    }
}

pub struct SchedulerController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for SchedulerController {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn start<F>(&mut self, schedule: watch::Receiver<Vec<ScheduleEntry>>, on_tick: F) -> Result<()>
    where
        F: FnMut(TickReport) -> bool + Send + 'static,
    {
        if self.is_active() {
            bail!("scheduler already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(scheduler_loop(schedule, on_tick, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Cancels the loop and waits up to five seconds for it to exit.
    pub async fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let Some(handle) = self.handle.take() else {
            return;
        };
        match tokio::time::timeout(Duration::from_secs(STOP_TIMEOUT_SECS), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log_error!("scheduler task failed to join: {err}"),
            Err(_) => log_warn!("scheduler did not stop within {STOP_TIMEOUT_SECS}s"),
        }
    }
}
