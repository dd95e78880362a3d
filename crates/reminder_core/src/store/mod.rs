mod feed;

pub use feed::{ChangeEvent, ChangeFeed, ChangeKind, WriteOrigin};

use crate::error::AppError;
use crate::model::{NotificationHandle, Task};
use crate::storage::{Backend, MemoryBackend, SCHEMA_VERSION, StoredState};
use crossbeam_channel::{Sender, unbounded};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Result of a synchronizer handle write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleSwap {
    Applied(Task),
    /// The task no longer exists.
    Missing,
    /// The stored handle was not the expected one; carries the stored value.
    Conflict(Option<NotificationHandle>),
}

struct Inner {
    tasks: IndexMap<String, Task>,
    retired: HashSet<String>,
    backend: Box<dyn Backend>,
    subscribers: Vec<Sender<ChangeEvent>>,
    next_seq: u64,
}

impl Inner {
    fn persist(&self) -> Result<(), AppError> {
        let mut retired_ids: Vec<String> = self.retired.iter().cloned().collect();
        retired_ids.sort();
        let state = StoredState {
            schema_version: SCHEMA_VERSION,
            tasks: self.tasks.values().cloned().collect(),
            retired_ids,
        };
        self.backend.save(&state)
    }

    fn emit(
        &mut self,
        kind: ChangeKind,
        origin: WriteOrigin,
        before: Option<Task>,
        after: Option<Task>,
    ) {
        let event = ChangeEvent {
            seq: self.next_seq,
            kind,
            origin,
            before,
            after,
        };
        self.next_seq += 1;
        debug!(seq = event.seq, task_id = event.task_id(), ?kind, ?origin, "change");
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn upsert(&mut self, task: Task, origin: WriteOrigin) -> Result<Option<Task>, AppError> {
        let previous = self.tasks.insert(task.id.clone(), task.clone());
        if let Err(err) = self.persist() {
            match previous {
                Some(previous) => {
                    self.tasks.insert(previous.id.clone(), previous);
                }
                None => {
                    self.tasks.shift_remove(&task.id);
                }
            }
            return Err(err);
        }

        let kind = if previous.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        self.emit(kind, origin, previous.clone(), Some(task));
        Ok(previous)
    }
}

/// Durable collection of tasks keyed by id, with a change feed.
///
/// All writes go through one lock that is held across persisting and
/// emitting, so subscribers observe events in apply order.
pub struct RecordStore {
    inner: Mutex<Inner>,
}

impl RecordStore {
    pub fn open(backend: Box<dyn Backend>) -> Result<Self, AppError> {
        let state = backend.load()?;
        let tasks = state
            .tasks
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();
        Ok(Self {
            inner: Mutex::new(Inner {
                tasks,
                retired: state.retired_ids.into_iter().collect(),
                backend,
                subscribers: Vec::new(),
                next_seq: 0,
            }),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: IndexMap::new(),
                retired: HashSet::new(),
                backend: Box::new(MemoryBackend::new()),
                subscribers: Vec::new(),
                next_seq: 0,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::store_io("record store lock poisoned"))
    }

    /// Subscribes to changes applied from now on.
    pub fn changes(&self) -> Result<ChangeFeed, AppError> {
        let (sender, receiver) = unbounded();
        self.lock()?.subscribers.push(sender);
        Ok(ChangeFeed::new(receiver))
    }

    /// Creates a task with a fresh id.
    pub fn create(
        &self,
        text: &str,
        reminder_time: Option<i64>,
        created_at: i64,
    ) -> Result<Task, AppError> {
        let id = format!("task-{}", Uuid::new_v4().simple());
        self.put(Task::new(id, text, created_at).with_reminder(reminder_time))
    }

    /// Upserts a task on behalf of the user.
    ///
    /// The notification handle is not writable here: updates keep the stored
    /// handle and new tasks start without one. Writes that change nothing are
    /// accepted without emitting an event.
    pub fn put(&self, mut task: Task) -> Result<Task, AppError> {
        if task.id.trim().is_empty() {
            return Err(AppError::validation("id is required"));
        }
        if task.text.trim().is_empty() {
            return Err(AppError::validation("text is required"));
        }

        let mut inner = self.lock()?;
        if inner.retired.contains(&task.id) {
            return Err(AppError::validation(format!(
                "id {} belonged to a deleted task",
                task.id
            )));
        }

        match inner.tasks.get(&task.id) {
            Some(existing) => {
                if existing.created_at != task.created_at {
                    return Err(AppError::validation("createdAt cannot change"));
                }
                task.notification_handle = existing.notification_handle.clone();
                if *existing == task {
                    return Ok(task);
                }
            }
            None => task.notification_handle = None,
        }

        inner.upsert(task.clone(), WriteOrigin::User)?;
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Result<Task, AppError> {
        self.find(id)?
            .ok_or_else(|| AppError::not_found(format!("task {id} not found")))
    }

    pub fn find(&self, id: &str) -> Result<Option<Task>, AppError> {
        Ok(self.lock()?.tasks.get(id).cloned())
    }

    /// Snapshot of every task in insertion order.
    pub fn scan(&self) -> Result<Vec<Task>, AppError> {
        Ok(self.lock()?.tasks.values().cloned().collect())
    }

    /// Removes a task and retires its id.
    pub fn delete(&self, id: &str) -> Result<Task, AppError> {
        let mut inner = self.lock()?;
        let (index, key, removed) = inner
            .tasks
            .shift_remove_full(id)
            .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;
        inner.retired.insert(key.clone());

        if let Err(err) = inner.persist() {
            inner.retired.remove(&key);
            inner.tasks.shift_insert(index, key, removed);
            return Err(err);
        }

        inner.emit(
            ChangeKind::Deleted,
            WriteOrigin::User,
            Some(removed.clone()),
            None,
        );
        Ok(removed)
    }

    /// Replaces the handle on the latest stored record if it still holds
    /// `expected`. Only the handle changes; the event is tagged as a
    /// synchronizer write.
    pub fn swap_handle(
        &self,
        id: &str,
        expected: Option<&NotificationHandle>,
        handle: Option<NotificationHandle>,
    ) -> Result<HandleSwap, AppError> {
        self.write_handle(id, expected, handle, |_| true)
    }

    /// Stores a freshly scheduled handle. Applies only while the latest record
    /// still holds `expected`, is open, and still wants its reminder at
    /// `fire_time`; anything else is reported as a conflict.
    pub fn attach_handle(
        &self,
        id: &str,
        expected: Option<&NotificationHandle>,
        fire_time: i64,
        handle: NotificationHandle,
    ) -> Result<HandleSwap, AppError> {
        self.write_handle(id, expected, Some(handle), |task| {
            !task.done && task.reminder_time == Some(fire_time)
        })
    }

    fn write_handle(
        &self,
        id: &str,
        expected: Option<&NotificationHandle>,
        handle: Option<NotificationHandle>,
        still_wanted: impl Fn(&Task) -> bool,
    ) -> Result<HandleSwap, AppError> {
        let mut inner = self.lock()?;
        let Some(current) = inner.tasks.get(id) else {
            return Ok(HandleSwap::Missing);
        };
        if current.notification_handle.as_ref() != expected || !still_wanted(current) {
            return Ok(HandleSwap::Conflict(current.notification_handle.clone()));
        }
        if current.notification_handle == handle {
            return Ok(HandleSwap::Applied(current.clone()));
        }

        let mut updated = current.clone();
        updated.notification_handle = handle;
        inner.upsert(updated.clone(), WriteOrigin::Synchronizer)?;
        Ok(HandleSwap::Applied(updated))
    }
}
