//! Daily and monthly quota windows.
//!
//! Resets are lazy: every read goes through `refresh`, which zeroes a window
//! whose boundary has passed and moves the boundary to the next local
//! midnight (daily) or first of the month (monthly).

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Denial;
use crate::recurrence::dates::{first_of_next_month, next_local_midnight};

/// One counting window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindow {
    pub used: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

impl QuotaWindow {
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// Fraction of the window consumed; a zero limit counts as fully used
    pub fn ratio(&self) -> f64 {
        if self.limit == 0 {
            return 1.0;
        }
        self.used as f64 / self.limit as f64
    }
}

/// Which windows a `refresh` call reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaReset {
    pub daily: bool,
    pub monthly: bool,
}

impl QuotaReset {
    pub fn any(&self) -> bool {
        self.daily || self.monthly
    }
}

/// Quota counters of one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub daily: QuotaWindow,
    pub monthly: QuotaWindow,
}

impl QuotaUsage {
    /// Fresh, unused quota whose windows end at the next boundaries after `now`
    pub fn new(daily_limit: u64, monthly_limit: u64, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            daily: QuotaWindow {
                used: 0,
                limit: daily_limit,
                reset_at: next_local_midnight(now, offset),
            },
            monthly: QuotaWindow {
                used: 0,
                limit: monthly_limit,
                reset_at: first_of_next_month(now, offset),
            },
        }
    }

    /// Replaces the limits, keeping counters and boundaries
    pub fn with_limits(mut self, daily_limit: u64, monthly_limit: u64) -> Self {
        self.daily.limit = daily_limit;
        self.monthly.limit = monthly_limit;
        self
    }

    /// Resets every window whose boundary is at or before `now`
    pub fn refresh(&mut self, now: DateTime<Utc>, offset: FixedOffset) -> QuotaReset {
        let mut reset = QuotaReset::default();
        if now >= self.daily.reset_at {
            self.daily.used = 0;
            self.daily.reset_at = next_local_midnight(now, offset);
            reset.daily = true;
        }
        if now >= self.monthly.reset_at {
            self.monthly.used = 0;
            self.monthly.reset_at = first_of_next_month(now, offset);
            reset.monthly = true;
        }
        reset
    }

    /// First exhausted window (daily before monthly) and when it frees up
    pub fn exhausted(&self) -> Option<(Denial, DateTime<Utc>)> {
        if self.daily.is_exhausted() {
            Some((Denial::DailyQuota, self.daily.reset_at))
        } else if self.monthly.is_exhausted() {
            Some((Denial::MonthlyQuota, self.monthly.reset_at))
        } else {
            None
        }
    }

    pub fn record_admission(&mut self) {
        self.daily.used += 1;
        self.monthly.used += 1;
    }

    /// Undoes one `record_admission`
    pub fn release_admission(&mut self) {
        self.daily.used = self.daily.used.saturating_sub(1);
        self.monthly.used = self.monthly.used.saturating_sub(1);
    }

    /// Highest consumption ratio across both windows
    pub fn usage_ratio(&self) -> f64 {
        self.daily.ratio().max(self.monthly.ratio())
    }
}
