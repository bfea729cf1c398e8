pub mod hooks;
pub mod notification;
pub mod recurring_event;

pub use hooks::{CommittedSeries, ReminderHook, SeriesHook};
pub use notification::{
    create_notifier, LogNotifier, NotificationError, ReminderNotifier, ReminderRequest,
    WebhookNotifier,
};
pub use recurring_event::{
    CreateOptions, DeleteOptions, RecurringEvent, RecurringEventService, RecurringEventUpdate,
    UpdateOptions,
};
