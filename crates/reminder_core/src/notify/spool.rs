use crate::clock::Clock;
use crate::error::AppError;
use crate::model::NotificationHandle;
use crate::notify::{NotificationScheduler, ReminderPayload};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

pub const DEFAULT_MAX_PENDING: usize = 64;
const SPOOL_SCHEMA_VERSION: u32 = 1;
const SPOOL_FILE_NAME: &str = "pending.json";
const SPOOL_ENV_VAR: &str = "REMINDER_SPOOL_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingNotification {
    pub handle: NotificationHandle,
    pub fire_time: i64,
    pub payload: ReminderPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpoolFile {
    schema_version: u32,
    next_handle: u64,
    pending: Vec<PendingNotification>,
}

impl Default for SpoolFile {
    fn default() -> Self {
        Self {
            schema_version: SPOOL_SCHEMA_VERSION,
            next_handle: 1,
            pending: Vec::new(),
        }
    }
}

pub fn spool_path(configured: Option<&Path>) -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(SPOOL_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }

    Ok(crate::config::app_dir()?.join(SPOOL_FILE_NAME))
}

/// Scheduler for desktops without a native deferred-notification service.
///
/// Notifications live in a spool (a JSON file, or memory only). An entry is
/// outstanding until its fire time; after that it counts as fired, is no
/// longer listed or cancelable, and waits for [`SpoolScheduler::take_due`] to
/// hand it to a deliverer. Handles are decimal strings from a persisted
/// counter and are never issued twice.
pub struct SpoolScheduler {
    path: Option<PathBuf>,
    max_pending: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<SpoolFile>,
}

impl SpoolScheduler {
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            path: None,
            max_pending: DEFAULT_MAX_PENDING,
            clock,
            state: Mutex::new(SpoolFile::default()),
        }
    }

    pub fn open<P: Into<PathBuf>>(path: P, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let path = path.into();
        let state = load_spool(&path)?;
        Ok(Self {
            path: Some(path),
            max_pending: DEFAULT_MAX_PENDING,
            clock,
            state: Mutex::new(state),
        })
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, SpoolFile>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::scheduling("spool lock poisoned"))
    }

    fn commit(&self, state: &SpoolFile) -> Result<(), AppError> {
        match &self.path {
            Some(path) => save_spool(path, state),
            None => Ok(()),
        }
    }

    /// Every spooled entry, fired or not, earliest first.
    pub fn pending(&self) -> Result<Vec<PendingNotification>, AppError> {
        let mut pending = self.lock()?.pending.clone();
        pending.sort_by_key(|entry| entry.fire_time);
        Ok(pending)
    }

    /// Removes and returns the notifications whose fire time has passed.
    pub fn take_due(&self) -> Result<Vec<PendingNotification>, AppError> {
        let now = self.clock.now_ms();
        let mut state = self.lock()?;
        let (mut due, waiting): (Vec<_>, Vec<_>) = state
            .pending
            .iter()
            .cloned()
            .partition(|entry| entry.fire_time <= now);
        if due.is_empty() {
            return Ok(due);
        }

        let mut next = state.clone();
        next.pending = waiting;
        self.commit(&next)?;
        *state = next;

        due.sort_by_key(|entry| entry.fire_time);
        Ok(due)
    }
}

impl NotificationScheduler for SpoolScheduler {
    fn schedule(
        &self,
        fire_time: i64,
        payload: &ReminderPayload,
    ) -> Result<NotificationHandle, AppError> {
        let now = self.clock.now_ms();
        if fire_time <= now {
            return Err(AppError::scheduling(format!(
                "fire time {fire_time} is not in the future"
            )));
        }

        let mut state = self.lock()?;
        let outstanding = state
            .pending
            .iter()
            .filter(|entry| entry.fire_time > now)
            .count();
        if outstanding >= self.max_pending {
            return Err(AppError::scheduling(format!(
                "pending notification quota of {} exhausted",
                self.max_pending
            )));
        }

        let handle = NotificationHandle::new(state.next_handle.to_string());
        let mut next = state.clone();
        next.next_handle += 1;
        next.pending.push(PendingNotification {
            handle: handle.clone(),
            fire_time,
            payload: payload.clone(),
        });
        self.commit(&next)?;
        *state = next;

        info!(%handle, task_id = %payload.task_id, fire_time, "notification scheduled");
        Ok(handle)
    }

    fn cancel(&self, handle: &NotificationHandle) -> Result<(), AppError> {
        let now = self.clock.now_ms();
        let mut state = self.lock()?;
        let outstanding =
            |entry: &PendingNotification| &entry.handle == handle && entry.fire_time > now;
        if !state.pending.iter().any(outstanding) {
            return Ok(());
        }

        let mut next = state.clone();
        next.pending.retain(|entry| !outstanding(entry));
        self.commit(&next)?;
        *state = next;

        info!(%handle, "notification canceled");
        Ok(())
    }

    fn list_pending(&self) -> Result<HashSet<NotificationHandle>, AppError> {
        let now = self.clock.now_ms();
        Ok(self
            .lock()?
            .pending
            .iter()
            .filter(|entry| entry.fire_time > now)
            .map(|entry| entry.handle.clone())
            .collect())
    }

    fn pending_fire_time(&self, handle: &NotificationHandle) -> Result<Option<i64>, AppError> {
        let now = self.clock.now_ms();
        Ok(self
            .lock()?
            .pending
            .iter()
            .find(|entry| &entry.handle == handle && entry.fire_time > now)
            .map(|entry| entry.fire_time))
    }
}

fn load_spool(path: &Path) -> Result<SpoolFile, AppError> {
    if !path.exists() {
        return Ok(SpoolFile::default());
    }

    let content =
        std::fs::read_to_string(path).map_err(|err| AppError::store_io(err.to_string()))?;
    let spool: SpoolFile =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;

    if spool.schema_version != SPOOL_SCHEMA_VERSION {
        return Err(AppError::invalid_data("spool schema_version mismatch"));
    }

    Ok(spool)
}

fn save_spool(path: &Path, spool: &SpoolFile) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| AppError::store_io(err.to_string()))?;
    }

    let content = serde_json::to_string_pretty(spool)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;
    std::fs::write(path, content).map_err(|err| AppError::store_io(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::SpoolScheduler;
    use crate::clock::ManualClock;
    use crate::model::NotificationHandle;
    use crate::notify::{NotificationScheduler, ReminderPayload};
    use std::sync::Arc;

    fn payload(task_id: &str) -> ReminderPayload {
        ReminderPayload {
            task_id: task_id.to_string(),
            text: "buy milk".to_string(),
        }
    }

    #[test]
    fn schedule_rejects_past_fire_time() {
        let clock = Arc::new(ManualClock::new(1_000));
        let scheduler = SpoolScheduler::in_memory(clock);

        let err = scheduler.schedule(1_000, &payload("task-1")).unwrap_err();
        assert_eq!(err.code(), "scheduling_error");
        assert!(scheduler.list_pending().unwrap().is_empty());
    }

    #[test]
    fn schedule_enforces_quota() {
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = SpoolScheduler::in_memory(clock).with_max_pending(1);

        scheduler.schedule(10, &payload("task-1")).unwrap();
        let err = scheduler.schedule(20, &payload("task-2")).unwrap_err();

        assert_eq!(err.code(), "scheduling_error");
        assert!(err.message().contains("quota"));
    }

    #[test]
    fn fired_entries_do_not_count_against_quota() {
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = SpoolScheduler::in_memory(clock.clone()).with_max_pending(1);
        let fired = scheduler.schedule(10, &payload("task-1")).unwrap();

        clock.set(10);
        let next = scheduler.schedule(20, &payload("task-2")).unwrap();

        assert_eq!(scheduler.pending().unwrap().len(), 2);
        assert_eq!(scheduler.pending_fire_time(&next).unwrap(), Some(20));
        assert_eq!(scheduler.pending_fire_time(&fired).unwrap(), None);
        let err = scheduler.schedule(30, &payload("task-3")).unwrap_err();
        assert!(err.message().contains("quota"));
    }

    #[test]
    fn handles_are_not_reused_after_cancel() {
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = SpoolScheduler::in_memory(clock);

        let first = scheduler.schedule(10, &payload("task-1")).unwrap();
        scheduler.cancel(&first).unwrap();
        let second = scheduler.schedule(10, &payload("task-1")).unwrap();

        assert_ne!(first, second);
        assert_eq!(scheduler.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn cancel_unknown_handle_is_ok() {
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = SpoolScheduler::in_memory(clock);

        scheduler.cancel(&NotificationHandle::new("99")).unwrap();
    }

    #[test]
    fn take_due_removes_only_elapsed_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = SpoolScheduler::in_memory(clock.clone());
        let early = scheduler.schedule(10, &payload("task-1")).unwrap();
        let late = scheduler.schedule(100, &payload("task-2")).unwrap();

        clock.set(50);
        let due = scheduler.take_due().unwrap();

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].handle, early);
        let pending = scheduler.list_pending().unwrap();
        assert!(pending.contains(&late));
        assert!(!pending.contains(&early));
    }

    #[test]
    fn fired_entries_are_not_listed_or_cancelable() {
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = SpoolScheduler::in_memory(clock.clone());
        let handle = scheduler.schedule(10, &payload("task-1")).unwrap();

        clock.set(10);
        assert!(scheduler.list_pending().unwrap().is_empty());
        scheduler.cancel(&handle).unwrap();

        let due = scheduler.take_due().unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].handle, handle);
        assert!(scheduler.take_due().unwrap().is_empty());
    }

    #[test]
    fn spool_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        let clock = Arc::new(ManualClock::new(0));

        let handle = {
            let scheduler = SpoolScheduler::open(&path, clock.clone()).unwrap();
            scheduler.schedule(10, &payload("task-1")).unwrap()
        };

        let scheduler = SpoolScheduler::open(&path, clock).unwrap();
        assert!(scheduler.list_pending().unwrap().contains(&handle));
        let next = scheduler.schedule(20, &payload("task-2")).unwrap();
        assert_ne!(next, handle);
    }
}
