pub mod json_store;

use crate::error::AppError;
use crate::model::Task;
use std::sync::Mutex;

pub use json_store::{JsonFileBackend, SCHEMA_VERSION, StoredState};

/// Durable storage underneath the record store.
///
/// `save` receives the complete state; a backend either persists all of it or
/// reports an error.
pub trait Backend: Send {
    fn load(&self) -> Result<StoredState, AppError>;
    fn save(&self, state: &StoredState) -> Result<(), AppError>;
}

/// Keeps the state in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<Option<StoredState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            state: Mutex::new(Some(StoredState {
                schema_version: SCHEMA_VERSION,
                tasks,
                retired_ids: Vec::new(),
            })),
        }
    }
}

impl Backend for MemoryBackend {
    fn load(&self) -> Result<StoredState, AppError> {
        let guard = self
            .state
            .lock()
            .map_err(|_| AppError::store_io("memory backend poisoned"))?;
        Ok(guard.clone().unwrap_or_default())
    }

    fn save(&self, state: &StoredState) -> Result<(), AppError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| AppError::store_io("memory backend poisoned"))?;
        *guard = Some(state.clone());
        Ok(())
    }
}
