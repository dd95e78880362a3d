use crate::error::AppError;
use crate::model::{NotificationHandle, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub mod spool;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxDeliverer;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::WindowsDeliverer;

pub use spool::{DEFAULT_MAX_PENDING, PendingNotification, SpoolScheduler};

/// Data handed to the platform at fire time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPayload {
    pub task_id: String,
    pub text: String,
}

impl ReminderPayload {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            text: task.text.clone(),
        }
    }
}

/// Deferred one-shot notifications provided by the platform.
pub trait NotificationScheduler: Send + Sync {
    /// Fails with a scheduling error when `fire_time` is not in the future or
    /// the platform quota is used up.
    fn schedule(
        &self,
        fire_time: i64,
        payload: &ReminderPayload,
    ) -> Result<NotificationHandle, AppError>;

    /// Unknown or already fired handles are not an error.
    fn cancel(&self, handle: &NotificationHandle) -> Result<(), AppError>;

    fn list_pending(&self) -> Result<HashSet<NotificationHandle>, AppError>;

    /// Fire time of an outstanding notification. `None` when the handle is not
    /// outstanding or the platform does not report fire times.
    fn pending_fire_time(&self, handle: &NotificationHandle) -> Result<Option<i64>, AppError> {
        let _ = handle;
        Ok(None)
    }
}

/// Shows a reminder to the user right now.
pub trait Deliverer {
    fn deliver(&self, payload: &ReminderPayload) -> Result<(), AppError>;

    fn deliver_with_action(&self, payload: &ReminderPayload, action: &str) -> Result<(), AppError> {
        let _ = action;
        self.deliver(payload)
    }
}

pub struct NoopDeliverer;

impl Deliverer for NoopDeliverer {
    fn deliver(&self, _payload: &ReminderPayload) -> Result<(), AppError> {
        Ok(())
    }
}

pub fn deliverer_from_env() -> Result<Box<dyn Deliverer>, AppError> {
    if std::env::var("REMINDER_DISABLE_NOTIFICATIONS").is_ok() {
        return Ok(Box::new(NoopDeliverer));
    }

    match platform_deliverer() {
        Ok(deliverer) => Ok(deliverer),
        Err(err) => match err {
            AppError::InvalidData(_) => Ok(Box::new(NoopDeliverer)),
            other => Err(other),
        },
    }
}

const ACTION_PREFIX: &str = "show:";

pub fn activation_argument(task_id: &str) -> String {
    format!("{ACTION_PREFIX}{task_id}")
}

pub fn parse_activation_argument(argument: &str) -> Option<String> {
    argument
        .strip_prefix(ACTION_PREFIX)
        .map(|id| id.to_string())
}

/// Re-launches the current binary as `<exe> show <task_id>`.
pub fn launch_show(task_id: &str) -> Result<(), AppError> {
    let exe = std::env::current_exe().map_err(|err| AppError::scheduling(err.to_string()))?;
    std::process::Command::new(exe)
        .arg("show")
        .arg(task_id)
        .spawn()
        .map_err(|err| AppError::scheduling(err.to_string()))?;
    Ok(())
}

#[cfg(target_os = "linux")]
pub fn platform_deliverer() -> Result<Box<dyn Deliverer>, AppError> {
    Ok(Box::new(LinuxDeliverer))
}

#[cfg(windows)]
pub fn platform_deliverer() -> Result<Box<dyn Deliverer>, AppError> {
    Ok(Box::new(WindowsDeliverer))
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn platform_deliverer() -> Result<Box<dyn Deliverer>, AppError> {
    Err(AppError::invalid_data(
        "notifications are not supported on this platform",
    ))
}
