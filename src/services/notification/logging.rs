use async_trait::async_trait;

use super::{NotificationError, ReminderNotifier, ReminderRequest};
use crate::models::Event;

/// Notifier that only writes registrations to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl ReminderNotifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn schedule_reminder(&self, reminder: &ReminderRequest) -> Result<(), NotificationError> {
        log::info!(
            "Reminder for '{}' ({}) at {}, {} min before start",
            reminder.title,
            reminder.event_id,
            reminder.remind_at,
            reminder.minutes_before
        );
        Ok(())
    }

    async fn schedule_notification(&self, event: &Event) -> Result<(), NotificationError> {
        log::info!("Event '{}' ({}) on {}", event.title, event.id, event.date);
        Ok(())
    }
}
