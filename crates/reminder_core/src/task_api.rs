use crate::clock::Clock;
use crate::error::AppError;
use crate::model::{NotificationHandle, Task};
use crate::notify::NotificationScheduler;
use crate::reconcile::{ReconcileReport, reconcile};
use crate::store::{ChangeFeed, RecordStore};
use crate::sync::{SyncOutcome, SyncWorker, Synchronizer};
use std::sync::Arc;

/// The task list as the UI sees it.
///
/// Mutations only touch the record store; reminders follow through the
/// change feed when [`ReminderApp::settle`] runs or a worker is attached.
pub struct ReminderApp {
    store: Arc<RecordStore>,
    synchronizer: Arc<Synchronizer>,
    clock: Arc<dyn Clock>,
    feed: ChangeFeed,
}

impl ReminderApp {
    /// Subscribes to the store, then reconciles once. Reconciler writes are
    /// handle-only and get skipped when the feed is settled.
    pub fn start(
        store: Arc<RecordStore>,
        scheduler: Arc<dyn NotificationScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, ReconcileReport), AppError> {
        let feed = store.changes()?;
        let report = reconcile(&store, &*scheduler, &*clock);
        let synchronizer = Arc::new(Synchronizer::new(
            store.clone(),
            scheduler,
            clock.clone(),
        ));
        let app = Self {
            store,
            synchronizer,
            clock,
            feed,
        };
        Ok((app, report))
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Runs the synchronizer over everything queued so far.
    pub fn settle(&self) -> Vec<SyncOutcome> {
        self.synchronizer.drain(&self.feed)
    }

    /// Hands the feed to a background worker for long-running processes.
    pub fn into_worker(self) -> (Arc<RecordStore>, SyncWorker) {
        let worker = SyncWorker::spawn(self.synchronizer, self.feed);
        (self.store, worker)
    }

    pub fn add_task(&self, text: &str, reminder_time: Option<i64>) -> Result<Task, AppError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation("text is required"));
        }
        self.store
            .create(trimmed, reminder_time, self.clock.now_ms())
    }

    pub fn get_task(&self, id: &str) -> Result<Task, AppError> {
        self.store.get(required_id(id)?)
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>, AppError> {
        self.store.scan()
    }

    pub fn edit_task(&self, id: &str, text: &str) -> Result<Task, AppError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation("text is required"));
        }
        self.update(id, |task| task.text = trimmed.to_string())
    }

    pub fn set_reminder(&self, id: &str, reminder_time: Option<i64>) -> Result<Task, AppError> {
        self.update(id, |task| task.reminder_time = reminder_time)
    }

    pub fn complete_task(&self, id: &str) -> Result<Task, AppError> {
        self.update(id, |task| task.done = true)
    }

    pub fn reopen_task(&self, id: &str) -> Result<Task, AppError> {
        self.update(id, |task| task.done = false)
    }

    pub fn delete_task(&self, id: &str) -> Result<Task, AppError> {
        self.store.delete(required_id(id)?)
    }

    /// Clears the handle of a notification the platform has already shown.
    pub fn retire_fired(&self, task_id: &str, handle: &NotificationHandle) -> Result<bool, AppError> {
        self.synchronizer.retire_fired(task_id, handle)
    }

    fn update<F: FnOnce(&mut Task)>(&self, id: &str, change: F) -> Result<Task, AppError> {
        let mut task = self.store.get(required_id(id)?)?;
        change(&mut task);
        self.store.put(task)
    }
}

fn required_id(id: &str) -> Result<&str, AppError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("id is required"));
    }
    Ok(trimmed)
}
