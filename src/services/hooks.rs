//! Post-commit hooks for recurring series.
//!
//! Hooks run after a series has been written. They cannot fail the
//! operation that triggered them; problems are logged and swallowed.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::models::Event;
use crate::services::notification::{ReminderNotifier, ReminderRequest};

/// Upper bound on concurrent reminder registrations
const REMINDER_CONCURRENCY: usize = 8;

/// A series that has just been created or regenerated
#[derive(Debug, Clone, Copy)]
pub struct CommittedSeries<'a> {
    pub parent: &'a Event,
    pub instances: &'a [Event],
    pub reminder_minutes: Option<u32>,
}

#[async_trait]
pub trait SeriesHook: Send + Sync {
    async fn on_series_committed(&self, series: &CommittedSeries<'_>);
}

/// Registers an event notification and a reminder for the parent and every
/// instance of a series
pub struct ReminderHook {
    notifier: Arc<dyn ReminderNotifier>,
}

impl ReminderHook {
    pub fn new(notifier: Arc<dyn ReminderNotifier>) -> Self {
        Self { notifier }
    }

    /// Both registrations for one event; returns how many failed
    async fn register(&self, event: &Event, minutes: u32) -> usize {
        let mut failed = 0;

        if let Err(e) = self.notifier.schedule_notification(event).await {
            log::warn!(
                "Failed to schedule {} notification for event {}: {}",
                self.notifier.name(),
                event.id,
                e
            );
            failed += 1;
        }

        let reminder = ReminderRequest::for_event(event, minutes);
        if let Err(e) = self.notifier.schedule_reminder(&reminder).await {
            log::warn!(
                "Failed to schedule {} reminder for event {}: {}",
                self.notifier.name(),
                event.id,
                e
            );
            failed += 1;
        }

        failed
    }
}

#[async_trait]
impl SeriesHook for ReminderHook {
    async fn on_series_committed(&self, series: &CommittedSeries<'_>) {
        let Some(minutes) = series.reminder_minutes else {
            return;
        };

        let events: Vec<&Event> = std::iter::once(series.parent)
            .chain(series.instances.iter())
            .collect();
        let total = events.len() * 2;

        let registrations: Vec<_> = events
            .into_iter()
            .map(|event| self.register(event, minutes))
            .collect();

        let failed: usize = stream::iter(registrations)
            .buffer_unordered(REMINDER_CONCURRENCY)
            .fold(0, |acc, failed| std::future::ready(acc + failed))
            .await;

        log::info!(
            "Scheduled {}/{} registration(s) for series {}",
            total - failed,
            total,
            series.parent.id
        );
    }
}
