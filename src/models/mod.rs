pub mod event;
pub mod rate_limit;
pub mod recurrence;

pub use event::{Event, EventFilter, EventLink, EventUpdate, NewEvent};
pub use rate_limit::{Denial, ProviderStatus, QueuedRequestInfo, RateLimitStatus, WarningLevel};
pub use recurrence::{
    EndType, Frequency, RecurrenceEnd, RecurrencePattern, RecurrenceRule, RecurrenceRuleConfig,
    WeekdayCode,
};
