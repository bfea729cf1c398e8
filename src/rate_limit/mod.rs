//! Admission control for rate-limited external providers.

pub mod bucket;
pub mod controller;
pub mod queue;
pub mod quota;

pub use bucket::TokenBucket;
pub use controller::{Admission, RateLimitController};
pub use queue::{QueuedRequest, RequestQueue};
pub use quota::{QuotaReset, QuotaUsage, QuotaWindow};
