//! Reminder delivery through pluggable notifiers (Strategy pattern).
//!
//! The recurrence service never talks to a notifier directly: reminder
//! registration runs from `ReminderHook` after a series is committed.

pub mod logging;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::Serialize;
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::models::Event;

pub use logging::LogNotifier;
pub use webhook::WebhookNotifier;

// =============================================================================
// Reminder Payload
// =============================================================================

/// Registration of one reminder for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderRequest {
    pub event_id: Uuid,
    /// Parent of the series, if the event is an instance
    pub series_id: Option<Uuid>,
    pub title: String,
    /// Local start of the event (midnight for all-day events)
    pub starts_at: NaiveDateTime,
    pub remind_at: NaiveDateTime,
    pub minutes_before: u32,
}

impl ReminderRequest {
    pub fn for_event(event: &Event, minutes_before: u32) -> Self {
        let start = if event.all_day {
            NaiveTime::MIN
        } else {
            event.start_time.unwrap_or(NaiveTime::MIN)
        };
        let starts_at = event.date.and_time(start);

        Self {
            event_id: event.id,
            series_id: event.parent_event_id(),
            title: event.title.clone(),
            starts_at,
            remind_at: starts_at - Duration::minutes(i64::from(minutes_before)),
            minutes_before,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Invalid notifier configuration: {0}")]
    Config(String),

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed")]
    Connect,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(String),
}

// =============================================================================
// Notifier Trait
// =============================================================================

/// Delivery channel for reminder and event notification registrations
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    /// Short channel name for logs
    fn name(&self) -> &'static str;

    /// Registers a reminder `minutes_before` the start of `reminder.event_id`
    async fn schedule_reminder(&self, reminder: &ReminderRequest) -> Result<(), NotificationError>;

    /// Registers a notification that `event` exists
    async fn schedule_notification(&self, event: &Event) -> Result<(), NotificationError>;
}

/// Picks the webhook notifier when a URL is configured, logging otherwise
pub fn create_notifier(
    config: &NotificationConfig,
) -> Result<Arc<dyn ReminderNotifier>, NotificationError> {
    match config.webhook_url {
        Some(ref url) => Ok(Arc::new(WebhookNotifier::new(
            url,
            config.webhook_secret.clone(),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
