//! Recurring sweep that re-sends acknowledgement reminders.
//!
//! The sweep scans every pending alarm on each tick instead of keeping
//! per-alarm timers. Overlap protection is a process-local flag, so running
//! several instances against shared storage would duplicate reminders.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::notices;
use crate::notify::queue::notify;
use crate::state::AppState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub pending: usize,
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped_no_driver: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SweepOutcome {
    /// Another sweep held the guard.
    Skipped,
    Completed(SweepReport),
}

struct SweepGuard<'a> {
    state: &'a AppState,
}

impl<'a> SweepGuard<'a> {
    fn acquire(state: &'a AppState) -> Option<Self> {
        state
            .sweep_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { state })
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.state.sweep_running.store(false, Ordering::Release);
    }
}

pub async fn run_reminder_scheduler(state: Arc<AppState>) {
    let period = state.config.reminder_interval;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = period.as_secs(), "reminder scheduler started");

    loop {
        ticker.tick().await;

        // Spawned so a slow sweep does not delay the timer; the guard
        // turns overlapping ticks into no-ops.
        let state = state.clone();
        tokio::spawn(async move {
            if let SweepOutcome::Completed(report) = run_sweep(&state, Utc::now()).await {
                if report.due > 0 {
                    info!(
                        due = report.due,
                        sent = report.sent,
                        failed = report.failed,
                        "reminder sweep finished"
                    );
                }
            }
        });
    }
}

/// One pass over pending alarms, evaluated at `now`.
pub async fn run_sweep(state: &AppState, now: DateTime<Utc>) -> SweepOutcome {
    let Some(_guard) = SweepGuard::acquire(state) else {
        debug!("reminder sweep already running; skipping tick");
        state
            .metrics
            .reminder_sweeps_total
            .with_label_values(&["skipped"])
            .inc();
        return SweepOutcome::Skipped;
    };

    let interval = match chrono::Duration::from_std(state.config.reminder_interval) {
        Ok(interval) => interval,
        Err(err) => {
            warn!(error = %err, "reminder interval out of range");
            return SweepOutcome::Completed(SweepReport::default());
        }
    };

    let pending = state.alarms.pending();
    state.metrics.pending_alarms.set(pending.len() as i64);

    let mut report = SweepReport {
        pending: pending.len(),
        ..SweepReport::default()
    };

    for alarm in pending {
        if !alarm.reminder_due(now, interval) {
            continue;
        }

        let Some(order) = state.orders.get(&alarm.order_id).map(|entry| entry.value().clone())
        else {
            report.skipped_no_driver += 1;
            continue;
        };
        let Some(driver_id) = order.driver_id else {
            debug!(order_id = %order.id, alarm_id = %alarm.id, "pending alarm without driver; skipping");
            report.skipped_no_driver += 1;
            continue;
        };

        report.due += 1;
        let job = notices::reminder_job(&alarm, driver_id, &order.order_code);

        match notify(state, job).await {
            Some(dispatched) if dispatched.delivered() => {
                if state.alarms.mark_reminded(alarm.order_id, alarm.id, now) {
                    report.sent += 1;
                }
            }
            Some(dispatched) if dispatched.stale => {
                debug!(alarm_id = %alarm.id, "alarm resolved during sweep");
            }
            _ => {
                report.failed += 1;
                warn!(
                    order_id = %alarm.order_id,
                    alarm_id = %alarm.id,
                    driver_id = %driver_id,
                    "reminder not delivered; will retry next sweep"
                );
            }
        }
    }

    state
        .metrics
        .reminder_sweeps_total
        .with_label_values(&["completed"])
        .inc();

    SweepOutcome::Completed(report)
}
