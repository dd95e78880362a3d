//! Startup repair of drift between stored handles and the scheduler.

use crate::clock::Clock;
use crate::model::{NotificationHandle, Task};
use crate::notify::{NotificationScheduler, ReminderPayload};
use crate::store::{HandleSwap, RecordStore};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tasks that received a fresh notification.
    pub scheduled: usize,
    /// Handles dropped from tasks that should not hold one.
    pub cleared: usize,
    /// Pending notifications no task referred to.
    pub orphans_canceled: usize,
    pub failures: usize,
    /// Set when the scheduler or the store could not be read at all.
    pub skipped: bool,
}

/// Diffs the scheduler's pending set against the stored tasks and repairs
/// both sides. Individual failures are logged and counted; nothing here
/// aborts startup.
pub fn reconcile(
    store: &RecordStore,
    scheduler: &dyn NotificationScheduler,
    clock: &dyn Clock,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    let pending = match scheduler.list_pending() {
        Ok(pending) => pending,
        Err(err) => {
            warn!(%err, "cannot list pending notifications, skipping reconciliation");
            report.skipped = true;
            return report;
        }
    };
    let tasks = match store.scan() {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(%err, "cannot scan tasks, skipping reconciliation");
            report.skipped = true;
            return report;
        }
    };

    let now = clock.now_ms();
    let referenced: HashSet<&NotificationHandle> = tasks
        .iter()
        .filter_map(|task| task.notification_handle.as_ref())
        .collect();

    for task in &tasks {
        let held = task.notification_handle.as_ref();
        if task.wants_reminder(now) {
            if let Some(handle) = held.filter(|handle| pending.contains(*handle)) {
                if !fires_elsewhere(scheduler, task, handle) {
                    continue;
                }
                if let Err(err) = scheduler.cancel(handle) {
                    warn!(task_id = %task.id, %handle, %err, "cancel failed");
                    report.failures += 1;
                    continue;
                }
            }
            rearm(store, scheduler, task, &mut report);
        } else if let Some(handle) = held {
            if pending.contains(handle)
                && let Err(err) = scheduler.cancel(handle)
            {
                warn!(task_id = %task.id, %handle, %err, "cancel failed");
                report.failures += 1;
                continue;
            }
            clear(store, task, handle, &mut report);
        }
    }

    for orphan in pending.iter().filter(|handle| !referenced.contains(handle)) {
        match scheduler.cancel(orphan) {
            Ok(()) => {
                info!(handle = %orphan, "orphaned notification canceled");
                report.orphans_canceled += 1;
            }
            Err(err) => {
                warn!(handle = %orphan, %err, "cannot cancel orphaned notification");
                report.failures += 1;
            }
        }
    }

    info!(
        scheduled = report.scheduled,
        cleared = report.cleared,
        orphans = report.orphans_canceled,
        failures = report.failures,
        "reconciliation finished"
    );
    report
}

/// True when the scheduler reports a fire time for `handle` that no longer
/// matches the task's reminder. Unknown fire times are trusted.
fn fires_elsewhere(
    scheduler: &dyn NotificationScheduler,
    task: &Task,
    handle: &NotificationHandle,
) -> bool {
    match scheduler.pending_fire_time(handle) {
        Ok(Some(fire_time)) => Some(fire_time) != task.reminder_time,
        Ok(None) => false,
        Err(err) => {
            warn!(task_id = %task.id, %handle, %err, "cannot read fire time");
            false
        }
    }
}

fn rearm(
    store: &RecordStore,
    scheduler: &dyn NotificationScheduler,
    task: &Task,
    report: &mut ReconcileReport,
) {
    let held = task.notification_handle.as_ref();
    let fire_time = task.reminder_time.unwrap_or_default();

    let handle = match scheduler.schedule(fire_time, &ReminderPayload::for_task(task)) {
        Ok(handle) => handle,
        Err(err) => {
            warn!(task_id = %task.id, %err, "cannot reschedule reminder");
            report.failures += 1;
            if let Some(stale) = held {
                clear(store, task, stale, report);
            }
            return;
        }
    };

    match store.attach_handle(&task.id, held, fire_time, handle.clone()) {
        Ok(HandleSwap::Applied(_)) => {
            info!(task_id = %task.id, %handle, "reminder restored");
            report.scheduled += 1;
        }
        other => {
            warn!(task_id = %task.id, %handle, ?other, "cannot store restored handle");
            report.failures += 1;
            if let Err(err) = scheduler.cancel(&handle) {
                warn!(%handle, %err, "cancel failed");
            }
        }
    }
}

fn clear(
    store: &RecordStore,
    task: &Task,
    handle: &NotificationHandle,
    report: &mut ReconcileReport,
) {
    match store.swap_handle(&task.id, Some(handle), None) {
        Ok(HandleSwap::Applied(_)) => report.cleared += 1,
        other => {
            warn!(task_id = %task.id, %handle, ?other, "cannot clear stale handle");
            report.failures += 1;
        }
    }
}
