use crate::clock::{Clock, ManualClock};
use crate::error::AppError;
use crate::model::NotificationHandle;
use crate::notify::{NotificationScheduler, ReminderPayload};
use crate::storage::{Backend, MemoryBackend, StoredState};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const NOW: i64 = 1_766_188_800_000;
pub const HOUR: i64 = 3_600_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Schedule { fire_time: i64, task_id: String },
    Cancel(NotificationHandle),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    pending: BTreeMap<NotificationHandle, i64>,
    next_handle: u64,
    fail_schedule: bool,
    fail_list: bool,
}

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Hooks {
    on_schedule: Option<Hook>,
    on_cancel: Option<Hook>,
}

/// In-memory scheduler that records every schedule/cancel call.
pub struct RecordingScheduler {
    clock: Arc<ManualClock>,
    state: Mutex<State>,
    hooks: Mutex<Hooks>,
}

impl RecordingScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
            hooks: Mutex::new(Hooks::default()),
        }
    }

    /// Runs `hook` at the start of the next `schedule` call, before the
    /// notification is created. Lets a test change the store mid-flight.
    pub fn before_next_schedule(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().unwrap().on_schedule = Some(Box::new(hook));
    }

    pub fn before_next_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().unwrap().on_cancel = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn schedule_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Schedule { .. }))
            .count()
    }

    pub fn cancel_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Cancel(_)))
            .count()
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn fail_schedules(&self, fail: bool) {
        self.state.lock().unwrap().fail_schedule = fail;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    /// Simulates a platform reset that drops every outstanding notification.
    pub fn forget_all(&self) {
        self.state.lock().unwrap().pending.clear();
    }

    /// Plants a notification the store knows nothing about.
    pub fn plant(&self, handle: &str, fire_time: i64) {
        self.state
            .lock()
            .unwrap()
            .pending
            .insert(NotificationHandle::new(handle), fire_time);
    }

    pub fn fire_time(&self, handle: &NotificationHandle) -> Option<i64> {
        self.state.lock().unwrap().pending.get(handle).copied()
    }
}

impl NotificationScheduler for RecordingScheduler {
    fn schedule(
        &self,
        fire_time: i64,
        payload: &ReminderPayload,
    ) -> Result<NotificationHandle, AppError> {
        let hook = self.hooks.lock().unwrap().on_schedule.take();
        if let Some(hook) = hook {
            hook();
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Schedule {
            fire_time,
            task_id: payload.task_id.clone(),
        });
        if state.fail_schedule {
            return Err(AppError::scheduling("quota exhausted"));
        }
        if fire_time <= self.clock.now_ms() {
            return Err(AppError::scheduling("fire time is in the past"));
        }
        state.next_handle += 1;
        let handle = NotificationHandle::new(format!("n{}", state.next_handle));
        state.pending.insert(handle.clone(), fire_time);
        Ok(handle)
    }

    fn cancel(&self, handle: &NotificationHandle) -> Result<(), AppError> {
        let hook = self.hooks.lock().unwrap().on_cancel.take();
        if let Some(hook) = hook {
            hook();
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Cancel(handle.clone()));
        state.pending.remove(handle);
        Ok(())
    }

    fn list_pending(&self) -> Result<HashSet<NotificationHandle>, AppError> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(AppError::scheduling("platform unavailable"));
        }
        Ok(state.pending.keys().cloned().collect())
    }

    fn pending_fire_time(&self, handle: &NotificationHandle) -> Result<Option<i64>, AppError> {
        Ok(self.fire_time(handle))
    }
}

/// Memory backend whose saves fail while its switch is on.
pub struct FlakyBackend {
    inner: MemoryBackend,
    failing: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct FailSwitch(Arc<AtomicBool>);

impl FailSwitch {
    pub fn set(&self, failing: bool) {
        self.0.store(failing, Ordering::SeqCst);
    }
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn switch(&self) -> FailSwitch {
        FailSwitch(self.failing.clone())
    }
}

impl Backend for FlakyBackend {
    fn load(&self) -> Result<StoredState, AppError> {
        self.inner.load()
    }

    fn save(&self, state: &StoredState) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::store_io("disk full"));
        }
        self.inner.save(state)
    }
}
