//! Admission control result and snapshot models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Warning Level
// =============================================================================

/// Quota pressure level, ordered from calm to exhausted
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    #[default]
    None,
    Warning,
    Critical,
}

impl WarningLevel {
    /// Level for a usage ratio given the provider thresholds
    pub fn from_ratio(ratio: f64, warning_threshold: f64, alert_threshold: f64) -> Self {
        if ratio >= alert_threshold {
            WarningLevel::Critical
        } else if ratio >= warning_threshold {
            WarningLevel::Warning
        } else {
            WarningLevel::None
        }
    }
}

impl std::fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarningLevel::None => write!(f, "none"),
            WarningLevel::Warning => write!(f, "warning"),
            WarningLevel::Critical => write!(f, "critical"),
        }
    }
}

// =============================================================================
// Admission Result
// =============================================================================

/// Why a check was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    /// Token bucket empty; retry within about one refill interval
    RateLimited,
    /// Daily quota used up until the next local midnight
    DailyQuota,
    /// Monthly quota used up until the first of next month
    MonthlyQuota,
}

/// Outcome of `check_rate_limit`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub provider: String,
    pub allowed: bool,
    pub tokens_remaining: f64,
    /// Milliseconds until a retry can succeed (denials only)
    pub retry_after_ms: Option<u64>,
    pub daily_remaining: u64,
    pub monthly_remaining: u64,
    pub warning_level: WarningLevel,
    pub denial: Option<Denial>,
}

impl RateLimitStatus {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self.denial,
            Some(Denial::DailyQuota) | Some(Denial::MonthlyQuota)
        )
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Read-only view of one provider's limiter state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub daily_used: u64,
    pub daily_limit: u64,
    pub daily_reset_at: DateTime<Utc>,
    pub monthly_used: u64,
    pub monthly_limit: u64,
    pub monthly_reset_at: DateTime<Utc>,
    pub queue_length: usize,
    pub warning_level: WarningLevel,
}

/// Entry of a provider queue as seen from outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedRequestInfo {
    pub id: Uuid,
    pub provider: String,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub timeout_ms: Option<u64>,
}
