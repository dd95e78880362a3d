use crate::error::AppError;
use crate::notify::{Deliverer, ReminderPayload, launch_show, parse_activation_argument};
use tauri_winrt_notification::Toast;

pub struct WindowsDeliverer;

impl Deliverer for WindowsDeliverer {
    fn deliver(&self, payload: &ReminderPayload) -> Result<(), AppError> {
        self.deliver_with_action(payload, "")
    }

    fn deliver_with_action(&self, payload: &ReminderPayload, action: &str) -> Result<(), AppError> {
        let task_id = payload.task_id.clone();
        let action_value = action.to_string();
        let mut toast = Toast::new(Toast::POWERSHELL_APP_ID)
            .title("Reminder")
            .text1(&payload.text);

        if !action_value.trim().is_empty() {
            toast = toast.add_button("Open", &action_value);
        }

        toast
            .on_activated(move |args| {
                let target = args
                    .as_deref()
                    .and_then(parse_activation_argument)
                    .unwrap_or_else(|| task_id.clone());
                let _ = launch_show(&target);
                Ok(())
            })
            .show()
            .map_err(|err| AppError::scheduling(err.to_string()))?;
        Ok(())
    }
}
