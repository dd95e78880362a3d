use crate::error::AppError;
use crate::notify::{Deliverer, ReminderPayload, launch_show};
use notify_rust::Notification;

pub struct LinuxDeliverer;

impl Deliverer for LinuxDeliverer {
    fn deliver(&self, payload: &ReminderPayload) -> Result<(), AppError> {
        self.deliver_with_action(payload, "")
    }

    fn deliver_with_action(&self, payload: &ReminderPayload, action: &str) -> Result<(), AppError> {
        let mut notification = Notification::new();
        notification.summary("Reminder");
        notification.body(&payload.text);
        if !action.trim().is_empty() {
            notification.action(action, "Open");
        }

        let handle = notification
            .show()
            .map_err(|err| AppError::scheduling(err.to_string()))?;

        if !action.trim().is_empty() {
            let action_key = action.to_string();
            let task_id = payload.task_id.clone();
            std::thread::spawn(move || {
                let _ = handle.wait_for_action(|selected| {
                    if selected == action_key || selected == "default" {
                        let _ = launch_show(&task_id);
                    }
                });
            });
        }

        Ok(())
    }
}
