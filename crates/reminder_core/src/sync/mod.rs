//! Keeps each task's notification handle in step with the scheduler.
//!
//! Every change event is evaluated against the latest stored record, never
//! against the event snapshot, so a burst of edits is scheduled against the
//! final values. Adapter failures are logged and degrade to "no reminder";
//! they never reach the caller that made the edit.

mod worker;

pub use worker::SyncWorker;

use crate::clock::Clock;
use crate::error::AppError;
use crate::model::{NotificationHandle, ReminderState, Task};
use crate::notify::{NotificationScheduler, ReminderPayload};
use crate::store::{ChangeEvent, ChangeFeed, ChangeKind, HandleSwap, RecordStore, WriteOrigin};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How often one event may plan again after losing a write-back race.
const MAX_REPLANS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped,
    /// A notification was scheduled and its handle stored.
    Armed(NotificationHandle),
    /// The outstanding notification was canceled and the handle cleared.
    Disarmed,
    /// A deleted task's notification was canceled, or one scheduled for a
    /// task that was deleted meanwhile was withdrawn.
    Canceled,
    /// The scheduler or the store refused; the task holds no handle.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    Skip(&'static str),
    Cancel(NotificationHandle),
    Disarm(NotificationHandle),
    Arm {
        replace: Option<NotificationHandle>,
        fire_time: i64,
        payload: ReminderPayload,
    },
}

fn plan(event: &ChangeEvent, latest: Option<&Task>, now: i64) -> Plan {
    if event.kind == ChangeKind::Deleted {
        return match event
            .before
            .as_ref()
            .and_then(|task| task.notification_handle.clone())
        {
            Some(handle) => Plan::Cancel(handle),
            None => Plan::Skip("deleted task held no handle"),
        };
    }

    if event.origin == WriteOrigin::Synchronizer && !event.reminder_changed() {
        return Plan::Skip("handle write-back");
    }

    let Some(task) = latest else {
        return Plan::Skip("task no longer stored");
    };

    match (task.desired_state(now), task.notification_handle.clone()) {
        (ReminderState::Armed, None) => Plan::Arm {
            replace: None,
            fire_time: task.reminder_time.unwrap_or_default(),
            payload: ReminderPayload::for_task(task),
        },
        (ReminderState::Armed, Some(handle)) => {
            let emitted = event
                .after
                .as_ref()
                .and_then(|after| after.notification_handle.as_ref());
            // A handle issued after this event was armed against newer state.
            let reissued = emitted != Some(&handle);
            let emitted_reminder = event.after.as_ref().and_then(|after| after.reminder_time);
            let moved = event.reminder_changed() || emitted_reminder != task.reminder_time;
            if moved && !reissued {
                Plan::Arm {
                    replace: Some(handle),
                    fire_time: task.reminder_time.unwrap_or_default(),
                    payload: ReminderPayload::for_task(task),
                }
            } else {
                Plan::Skip("handle already current")
            }
        }
        (_, Some(handle)) => Plan::Disarm(handle),
        (_, None) => Plan::Skip("no reminder outstanding"),
    }
}

pub struct Synchronizer {
    store: Arc<RecordStore>,
    scheduler: Arc<dyn NotificationScheduler>,
    clock: Arc<dyn Clock>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<RecordStore>,
        scheduler: Arc<dyn NotificationScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock,
        }
    }

    pub fn process(&self, event: &ChangeEvent) -> SyncOutcome {
        let task_id = event.task_id();
        let latest = if event.kind == ChangeKind::Deleted {
            None
        } else {
            match self.store.find(task_id) {
                Ok(latest) => latest,
                Err(err) => {
                    error!(task_id, %err, "cannot read task for reminder sync");
                    return SyncOutcome::Failed;
                }
            }
        };

        match plan(event, latest.as_ref(), self.clock.now_ms()) {
            Plan::Skip(reason) => {
                debug!(seq = event.seq, task_id, reason, "no scheduler action");
                SyncOutcome::Skipped
            }
            Plan::Cancel(handle) => {
                self.cancel(&handle);
                SyncOutcome::Canceled
            }
            Plan::Disarm(handle) => {
                self.cancel(&handle);
                self.clear_handle(task_id, &handle, MAX_REPLANS)
            }
            Plan::Arm {
                replace,
                fire_time,
                payload,
            } => self.arm(task_id, replace, fire_time, &payload, MAX_REPLANS),
        }
    }

    /// Processes every event queued on `feed`, including the write-backs that
    /// processing itself produces.
    pub fn drain(&self, feed: &ChangeFeed) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::new();
        while let Some(event) = feed.try_next() {
            outcomes.push(self.process(&event));
        }
        outcomes
    }

    /// Drops the handle of a notification that has already been delivered.
    pub fn retire_fired(&self, task_id: &str, handle: &NotificationHandle) -> Result<bool, AppError> {
        match self.store.swap_handle(task_id, Some(handle), None)? {
            HandleSwap::Applied(_) => Ok(true),
            HandleSwap::Missing | HandleSwap::Conflict(_) => Ok(false),
        }
    }

    fn arm(
        &self,
        task_id: &str,
        replace: Option<NotificationHandle>,
        fire_time: i64,
        payload: &ReminderPayload,
        replans: usize,
    ) -> SyncOutcome {
        if let Some(previous) = replace.as_ref() {
            self.cancel(previous);
        }

        let handle = match self.scheduler.schedule(fire_time, payload) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(task_id, fire_time, %err, "reminder not scheduled");
                if let Some(previous) = replace.as_ref() {
                    self.forget_handle(task_id, previous);
                }
                return SyncOutcome::Failed;
            }
        };

        match self
            .store
            .attach_handle(task_id, replace.as_ref(), fire_time, handle.clone())
        {
            Ok(HandleSwap::Applied(_)) => {
                info!(task_id, %handle, fire_time, "reminder armed");
                SyncOutcome::Armed(handle)
            }
            Ok(HandleSwap::Missing) => {
                debug!(task_id, %handle, "task deleted while scheduling, withdrawing");
                self.cancel(&handle);
                SyncOutcome::Canceled
            }
            Ok(HandleSwap::Conflict(current)) => {
                debug!(task_id, %handle, ?current, "task changed while scheduling, planning again");
                self.cancel(&handle);
                self.replan(task_id, replans)
            }
            Err(err) => {
                error!(task_id, %handle, %err, "cannot store notification handle, withdrawing");
                self.cancel(&handle);
                if let Some(previous) = replace.as_ref() {
                    self.forget_handle(task_id, previous);
                }
                SyncOutcome::Failed
            }
        }
    }

    fn clear_handle(
        &self,
        task_id: &str,
        handle: &NotificationHandle,
        replans: usize,
    ) -> SyncOutcome {
        match self.store.swap_handle(task_id, Some(handle), None) {
            Ok(HandleSwap::Applied(_)) | Ok(HandleSwap::Missing) => {
                info!(task_id, %handle, "reminder disarmed");
                SyncOutcome::Disarmed
            }
            Ok(HandleSwap::Conflict(current)) => {
                debug!(task_id, %handle, ?current, "handle replaced before clearing, planning again");
                self.replan(task_id, replans)
            }
            Err(err) => {
                error!(task_id, %handle, %err, "cannot clear notification handle");
                SyncOutcome::Failed
            }
        }
    }

    /// Plans again from the latest stored record after a write-back lost a
    /// race with another write.
    fn replan(&self, task_id: &str, replans: usize) -> SyncOutcome {
        let Some(remaining) = replans.checked_sub(1) else {
            warn!(task_id, "task kept changing during sync, leaving it to its next change");
            return SyncOutcome::Failed;
        };
        let latest = match self.store.find(task_id) {
            Ok(Some(latest)) => latest,
            Ok(None) => return SyncOutcome::Skipped,
            Err(err) => {
                error!(task_id, %err, "cannot read task for reminder sync");
                return SyncOutcome::Failed;
            }
        };

        let now = self.clock.now_ms();
        match (latest.desired_state(now), latest.notification_handle.clone()) {
            (ReminderState::Armed, current) => self.arm(
                task_id,
                current,
                latest.reminder_time.unwrap_or_default(),
                &ReminderPayload::for_task(&latest),
                remaining,
            ),
            (_, Some(current)) => {
                self.cancel(&current);
                self.clear_handle(task_id, &current, remaining)
            }
            (_, None) => SyncOutcome::Skipped,
        }
    }

    /// Drops a handle that was already canceled, without planning again.
    fn forget_handle(&self, task_id: &str, handle: &NotificationHandle) {
        if let Err(err) = self.store.swap_handle(task_id, Some(handle), None) {
            error!(task_id, %handle, %err, "cannot clear notification handle");
        }
    }

    fn cancel(&self, handle: &NotificationHandle) {
        if let Err(err) = self.scheduler.cancel(handle) {
            warn!(%handle, %err, "cancel failed");
        }
    }
}
