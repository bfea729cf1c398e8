//! Recurrence engine.
//!
//! Pure date math: `compute_next_occurrence` steps a single date forward and
//! `plan_occurrences` expands a bounded series. Persisting the resulting
//! instances is the job of `services::RecurringEventService`.

pub mod dates;
pub mod expand;
pub mod next;

pub use expand::{plan_occurrences, GenerateOptions, DEFAULT_MAX_INSTANCES, MAX_INSTANCES_HARD_CAP};
pub use next::compute_next_occurrence;
