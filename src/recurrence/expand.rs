//! Bounded expansion of a recurrence pattern into occurrence dates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::next::compute_next_occurrence;
use crate::error::AppResult;
use crate::models::{RecurrenceEnd, RecurrencePattern};

/// Absolute ceiling on expansion iterations, whatever the caller asks for
pub const MAX_INSTANCES_HARD_CAP: usize = 1000;

/// Default expansion bound when the caller does not choose one
pub const DEFAULT_MAX_INSTANCES: usize = 100;

/// Bounds for one expansion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub max_instances: usize,
    /// First candidate date; defaults to the parent's own date
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper bound on occurrence dates
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INSTANCES)
    }
}

impl GenerateOptions {
    pub fn new(max_instances: usize) -> Self {
        Self {
            max_instances,
            start_date: None,
            end_date: None,
        }
    }

    pub fn starting(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn until(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    /// Iteration budget actually applied
    pub fn budget(&self) -> usize {
        self.max_instances.min(MAX_INSTANCES_HARD_CAP)
    }
}

/// Lists the dates that should be materialized as instances of a series.
///
/// Walks at most `options.budget()` candidate dates. Exception dates and the
/// parent's own date are skipped but still use up an iteration, which keeps
/// the walk finite for rules that never end.
pub fn plan_occurrences(
    parent_date: NaiveDate,
    pattern: &RecurrencePattern,
    options: &GenerateOptions,
) -> AppResult<Vec<NaiveDate>> {
    let budget = options.budget();
    let mut current = options.start_date.unwrap_or(parent_date);
    let mut planned = Vec::new();

    for iteration in 0..budget {
        match pattern.end {
            RecurrenceEnd::Count { end_count } if planned.len() >= end_count as usize => break,
            RecurrenceEnd::Until { end_date } if current > end_date => break,
            _ => {}
        }
        if options.end_date.is_some_and(|bound| current > bound) {
            break;
        }

        if current != parent_date && !pattern.is_exception(current) {
            planned.push(current);
        }

        if iteration + 1 < budget {
            current = compute_next_occurrence(current, pattern)?;
        }
    }

    Ok(planned)
}
