mod task;

pub use task::{NotificationHandle, ReminderState, Task};
