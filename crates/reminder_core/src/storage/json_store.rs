use crate::error::AppError;
use crate::model::Task;
use crate::storage::Backend;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u32 = 1;
const STORE_FILE_NAME: &str = "tasks.json";
const STORE_ENV_VAR: &str = "REMINDER_STORE_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    pub schema_version: u32,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub retired_ids: Vec<String>,
}

impl Default for StoredState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            tasks: Vec::new(),
            retired_ids: Vec::new(),
        }
    }
}

/// Resolves the task file: environment first, then the configured path, then
/// the per-user config directory.
pub fn store_path(configured: Option<&Path>) -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(STORE_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }

    Ok(crate::config::app_dir()?.join(STORE_FILE_NAME))
}

pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for JsonFileBackend {
    fn load(&self) -> Result<StoredState, AppError> {
        load_state(&self.path)
    }

    fn save(&self, state: &StoredState) -> Result<(), AppError> {
        save_state(&self.path, state)
    }
}

pub fn load_state(path: &Path) -> Result<StoredState, AppError> {
    if !path.exists() {
        return Ok(StoredState::default());
    }

    let content =
        std::fs::read_to_string(path).map_err(|err| AppError::store_io(err.to_string()))?;
    let stored: StoredState =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;

    if stored.schema_version != SCHEMA_VERSION {
        return Err(AppError::invalid_data("schema_version mismatch"));
    }

    let mut seen = HashSet::new();
    for task in &stored.tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(AppError::invalid_data(format!(
                "duplicate task id {}",
                task.id
            )));
        }
    }

    if let Some(id) = stored
        .retired_ids
        .iter()
        .find(|id| seen.contains(id.as_str()))
    {
        return Err(AppError::invalid_data(format!(
            "retired id {id} is still in use"
        )));
    }

    Ok(stored)
}

pub fn save_state(path: &Path, state: &StoredState) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| AppError::store_io(err.to_string()))?;
    }

    let content = serde_json::to_string_pretty(state)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;
    std::fs::write(path, content).map_err(|err| AppError::store_io(err.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, permissions)
            .map_err(|err| AppError::store_io(err.to_string()))?;
    }

    Ok(())
}
