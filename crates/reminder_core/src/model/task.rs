use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token issued by a notification scheduler.
///
/// Older stores persisted a numeric `notificationId`; both forms load into the
/// same string token and no ordering is implied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NotificationHandle(String);

impl NotificationHandle {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NotificationHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawHandle {
            Text(String),
            Number(u64),
        }

        match RawHandle::deserialize(deserializer)? {
            RawHandle::Text(value) if value.trim().is_empty() => {
                Err(de::Error::custom("notification handle cannot be empty"))
            }
            RawHandle::Text(value) => Ok(Self(value)),
            RawHandle::Number(value) => Ok(Self(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub done: bool,
    pub created_at: i64,
    #[serde(default)]
    pub reminder_time: Option<i64>,
    #[serde(default, alias = "notificationId")]
    pub notification_handle: Option<NotificationHandle>,
}

/// Where a task's reminder should stand at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderState {
    /// No reminder requested.
    None,
    /// Reminder in the future on an open task; a handle must be held.
    Armed,
    /// Reminder elapsed or task done; any handle must be dropped.
    Stale,
}

impl Task {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, text: T, created_at: i64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            done: false,
            created_at,
            reminder_time: None,
            notification_handle: None,
        }
    }

    pub fn with_reminder(mut self, reminder_time: Option<i64>) -> Self {
        self.reminder_time = reminder_time;
        self
    }

    pub fn desired_state(&self, now: i64) -> ReminderState {
        match self.reminder_time {
            None => ReminderState::None,
            Some(at) if !self.done && at > now => ReminderState::Armed,
            Some(_) => ReminderState::Stale,
        }
    }

    pub fn wants_reminder(&self, now: i64) -> bool {
        self.desired_state(now) == ReminderState::Armed
    }
}
