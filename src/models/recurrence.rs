//! Recurrence rule models.
//!
//! `RecurrenceRuleConfig` is the caller-facing shape (flat end type, count and
//! date). Validation turns it into a `RecurrencePattern`, whose `end` field
//! admits exactly one termination condition.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

// =============================================================================
// Frequency
// =============================================================================

/// Recurrence frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            other => Err(AppError::Validation(format!(
                "Unknown recurrence frequency '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Weekday Codes
// =============================================================================

/// Two-letter weekday code (`MO`..`SU`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WeekdayCode {
    Mo,
    Tu,
    We,
    Th,
    Fr,
    Sa,
    Su,
}

impl WeekdayCode {
    /// Day index with Sunday = 0
    pub fn index(&self) -> u32 {
        match self {
            WeekdayCode::Su => 0,
            WeekdayCode::Mo => 1,
            WeekdayCode::Tu => 2,
            WeekdayCode::We => 3,
            WeekdayCode::Th => 4,
            WeekdayCode::Fr => 5,
            WeekdayCode::Sa => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WeekdayCode::Mo => "MO",
            WeekdayCode::Tu => "TU",
            WeekdayCode::We => "WE",
            WeekdayCode::Th => "TH",
            WeekdayCode::Fr => "FR",
            WeekdayCode::Sa => "SA",
            WeekdayCode::Su => "SU",
        }
    }
}

impl FromStr for WeekdayCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MO" => Ok(WeekdayCode::Mo),
            "TU" => Ok(WeekdayCode::Tu),
            "WE" => Ok(WeekdayCode::We),
            "TH" => Ok(WeekdayCode::Th),
            "FR" => Ok(WeekdayCode::Fr),
            "SA" => Ok(WeekdayCode::Sa),
            "SU" => Ok(WeekdayCode::Su),
            other => Err(AppError::Validation(format!("Unknown weekday code '{}'", other))),
        }
    }
}

// =============================================================================
// End Condition
// =============================================================================

/// Termination kind as supplied by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndType {
    #[default]
    Never,
    Count,
    Date,
}

/// Validated termination condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "end_type", rename_all = "UPPERCASE")]
pub enum RecurrenceEnd {
    Never,
    Count { end_count: u32 },
    #[serde(rename = "DATE")]
    Until { end_date: NaiveDate },
}

impl RecurrenceEnd {
    pub fn end_type(&self) -> EndType {
        match self {
            RecurrenceEnd::Never => EndType::Never,
            RecurrenceEnd::Count { .. } => EndType::Count,
            RecurrenceEnd::Until { .. } => EndType::Date,
        }
    }
}

// =============================================================================
// Recurrence Pattern & Rule
// =============================================================================

/// Validated recurrence pattern, everything the engine needs to expand a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub frequency: Frequency,
    pub interval: u32,
    #[serde(default)]
    pub by_day: Vec<WeekdayCode>,
    #[serde(default)]
    pub by_month_day: Vec<u32>,
    #[serde(default)]
    pub by_month: Vec<u32>,
    #[serde(default)]
    pub by_set_pos: Option<i32>,
    #[serde(flatten)]
    pub end: RecurrenceEnd,
    #[serde(default)]
    pub exception_dates: Vec<NaiveDate>,
}

impl RecurrencePattern {
    /// Plain pattern with interval 1 and no constraints
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
            by_set_pos: None,
            end: RecurrenceEnd::Never,
            exception_dates: Vec::new(),
        }
    }

    pub fn is_exception(&self, date: NaiveDate) -> bool {
        self.exception_dates.contains(&date)
    }
}

/// Persisted recurrence rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub id: Uuid,
    #[serde(flatten)]
    pub pattern: RecurrencePattern,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Caller-facing Rule Configuration
// =============================================================================

/// DTO for creating or replacing a recurrence rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRuleConfig {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub by_day: Vec<WeekdayCode>,
    #[serde(default)]
    pub by_month_day: Vec<u32>,
    #[serde(default)]
    pub by_month: Vec<u32>,
    #[serde(default)]
    pub by_set_pos: Option<i32>,
    #[serde(default)]
    pub end_type: EndType,
    #[serde(default)]
    pub end_count: Option<u32>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub exception_dates: Vec<NaiveDate>,
}

fn default_interval() -> u32 {
    1
}

/// Largest accepted `interval`; rules are stored in signed 32-bit columns
pub const MAX_INTERVAL: u32 = i32::MAX as u32;

/// Largest accepted COUNT end
pub const MAX_END_COUNT: u32 = i32::MAX as u32;

impl RecurrenceRuleConfig {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
            by_set_pos: None,
            end_type: EndType::Never,
            end_count: None,
            end_date: None,
            exception_dates: Vec::new(),
        }
    }

    /// Validates the configuration and produces the pattern to persist
    pub fn validate(&self) -> AppResult<RecurrencePattern> {
        if self.interval < 1 {
            return Err(AppError::Validation(
                "interval must be at least 1".to_string(),
            ));
        }
        if self.interval > MAX_INTERVAL {
            return Err(AppError::Validation(format!(
                "interval must be at most {}",
                MAX_INTERVAL
            )));
        }

        if let Some(day) = self.by_month_day.iter().find(|d| !(1..=31).contains(*d)) {
            return Err(AppError::Validation(format!(
                "by_month_day value {} is outside 1..=31",
                day
            )));
        }

        if let Some(month) = self.by_month.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(AppError::Validation(format!(
                "by_month value {} is outside 1..=12",
                month
            )));
        }

        if let Some(pos) = self.by_set_pos {
            if pos != -1 && !(1..=5).contains(&pos) {
                return Err(AppError::Validation(format!(
                    "by_set_pos must be -1 or 1..=5, got {}",
                    pos
                )));
            }
            if self.by_day.is_empty() {
                return Err(AppError::Validation(
                    "by_set_pos requires at least one by_day weekday".to_string(),
                ));
            }
        }

        let end = match self.end_type {
            EndType::Never => RecurrenceEnd::Never,
            EndType::Count => match self.end_count {
                Some(count) if count > MAX_END_COUNT => {
                    return Err(AppError::Validation(format!(
                        "end_count must be at most {}",
                        MAX_END_COUNT
                    )));
                }
                Some(count) if count >= 1 => RecurrenceEnd::Count { end_count: count },
                Some(_) => {
                    return Err(AppError::Validation(
                        "end_count must be at least 1 when end_type is COUNT".to_string(),
                    ))
                }
                None => {
                    return Err(AppError::Validation(
                        "end_count is required when end_type is COUNT".to_string(),
                    ))
                }
            },
            EndType::Date => match self.end_date {
                Some(end_date) => RecurrenceEnd::Until { end_date },
                None => {
                    return Err(AppError::Validation(
                        "end_date is required when end_type is DATE".to_string(),
                    ))
                }
            },
        };

        let mut by_day = self.by_day.clone();
        by_day.sort_by_key(WeekdayCode::index);
        by_day.dedup();

        let mut by_month_day = self.by_month_day.clone();
        by_month_day.sort_unstable();
        by_month_day.dedup();

        let mut by_month = self.by_month.clone();
        by_month.sort_unstable();
        by_month.dedup();

        Ok(RecurrencePattern {
            frequency: self.frequency,
            interval: self.interval,
            by_day,
            by_month_day,
            by_month,
            by_set_pos: self.by_set_pos,
            end,
            exception_dates: self.exception_dates.clone(),
        })
    }
}
