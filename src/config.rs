use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::{DEFAULT_MAX_INSTANCES, MAX_INSTANCES_HARD_CAP};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub rate_limit: RateLimitConfig,
    pub recurrence: RecurrenceConfig,
    pub notification: NotificationConfig,
}

/// Database connection pool configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// Recurrence expansion defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceConfig {
    /// Expansion bound used when a caller does not pass one
    pub default_max_instances: usize,
}

/// Where reminder registrations are sent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationConfig {
    /// Webhook endpoint; reminders are only logged when unset
    pub webhook_url: Option<String>,
    /// HMAC secret for the webhook signature header
    pub webhook_secret: Option<String>,
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Burst and refill settings of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRateLimit {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
    /// Token bucket capacity
    pub burst_capacity: u32,
    /// Tokens per second
    pub refill_rate: f64,
}

/// Quota ceilings and alert thresholds of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuota {
    pub daily_limit: u64,
    pub monthly_limit: u64,
    /// Usage ratio at which the level becomes `warning`
    pub warning_threshold: f64,
    /// Usage ratio at which the level becomes `critical`
    pub alert_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub rate_limit: ProviderRateLimit,
    pub quota: ProviderQuota,
}

impl ProviderConfig {
    /// Preset for metered third-party APIs
    pub fn standard() -> Self {
        Self {
            rate_limit: ProviderRateLimit {
                requests_per_minute: 60,
                requests_per_hour: 1_000,
                requests_per_day: 10_000,
                burst_capacity: 10,
                refill_rate: 1.0,
            },
            quota: ProviderQuota {
                daily_limit: 1_000,
                monthly_limit: 25_000,
                warning_threshold: 0.8,
                alert_threshold: 0.95,
            },
        }
    }

    /// Preset for the fallback tier with generous limits
    pub fn unrestricted() -> Self {
        Self {
            rate_limit: ProviderRateLimit {
                requests_per_minute: 600,
                requests_per_hour: 30_000,
                requests_per_day: 500_000,
                burst_capacity: 100,
                refill_rate: 10.0,
            },
            quota: ProviderQuota {
                daily_limit: 100_000,
                monthly_limit: 3_000_000,
                warning_threshold: 0.9,
                alert_threshold: 0.99,
            },
        }
    }

    /// Checks the values a token bucket and quota can actually run with
    pub fn validate(&self, provider: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidProvider {
            provider: provider.to_string(),
            reason: reason.to_string(),
        };

        if self.rate_limit.burst_capacity == 0 {
            return Err(invalid("burst_capacity must be greater than 0"));
        }
        if !self.rate_limit.refill_rate.is_finite() || self.rate_limit.refill_rate <= 0.0 {
            return Err(invalid("refill_rate must be a positive number"));
        }
        let q = &self.quota;
        if !(q.warning_threshold > 0.0
            && q.warning_threshold <= q.alert_threshold
            && q.alert_threshold <= 1.0)
        {
            return Err(invalid(
                "thresholds must satisfy 0 < warning_threshold <= alert_threshold <= 1",
            ));
        }
        Ok(())
    }

    /// Loads a provider from `RATE_LIMIT_<NAME>_*` variables on top of its tier preset
    pub fn from_env(provider: &str) -> Result<Self, ConfigError> {
        let prefix = format!("RATE_LIMIT_{}", env_segment(provider));
        let var = |suffix: &str| format!("{}_{}", prefix, suffix);

        let base = match env::var(var("TIER")).as_deref() {
            Ok("unrestricted") => Self::unrestricted(),
            _ => Self::standard(),
        };

        let requests_per_minute = parse_env(
            &var("REQUESTS_PER_MINUTE"),
            base.rate_limit.requests_per_minute,
        );
        let refill_default = if env::var(var("REQUESTS_PER_MINUTE")).is_ok() {
            requests_per_minute as f64 / 60.0
        } else {
            base.rate_limit.refill_rate
        };

        let config = Self {
            rate_limit: ProviderRateLimit {
                requests_per_minute,
                requests_per_hour: parse_env(
                    &var("REQUESTS_PER_HOUR"),
                    base.rate_limit.requests_per_hour,
                ),
                requests_per_day: parse_env(
                    &var("REQUESTS_PER_DAY"),
                    base.rate_limit.requests_per_day,
                ),
                burst_capacity: parse_env(&var("BURST_CAPACITY"), base.rate_limit.burst_capacity),
                refill_rate: parse_env(&var("REFILL_RATE"), refill_default),
            },
            quota: ProviderQuota {
                daily_limit: parse_env(&var("DAILY_LIMIT"), base.quota.daily_limit),
                monthly_limit: parse_env(&var("MONTHLY_LIMIT"), base.quota.monthly_limit),
                warning_threshold: parse_env(
                    &var("WARNING_THRESHOLD"),
                    base.quota.warning_threshold,
                ),
                alert_threshold: parse_env(&var("ALERT_THRESHOLD"), base.quota.alert_threshold),
            },
        };

        config.validate(provider)?;
        Ok(config)
    }
}

/// Admission controller configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub providers: HashMap<String, ProviderConfig>,
    /// Period of the background token refill
    pub refill_tick: Duration,
    /// Period of the background queue drain
    pub drain_tick: Duration,
    /// Offset of the "local" zone in which days and months roll over
    pub quota_utc_offset_minutes: i32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            refill_tick: Duration::from_millis(1000),
            drain_tick: Duration::from_millis(250),
            quota_utc_offset_minutes: 0,
        }
    }
}

impl RateLimitConfig {
    /// Adds or replaces a provider
    pub fn with_provider(mut self, name: impl Into<String>, provider: ProviderConfig) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Zone used for quota boundaries; out-of-range offsets fall back to UTC
    pub fn quota_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.quota_utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        for (name, provider) in &self.providers {
            provider.validate(name)?;
        }
        Ok(())
    }

    /// Load rate limit configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let names = env::var("RATE_LIMIT_PROVIDERS").unwrap_or_else(|_| "default".to_string());

        let mut providers = HashMap::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            providers.insert(name.to_string(), ProviderConfig::from_env(name)?);
        }

        let config = Self {
            providers,
            refill_tick: Duration::from_millis(parse_env("RATE_LIMIT_REFILL_TICK_MS", 1000)),
            drain_tick: Duration::from_millis(parse_env("RATE_LIMIT_DRAIN_TICK_MS", 250)),
            quota_utc_offset_minutes: parse_env("QUOTA_UTC_OFFSET_MINUTES", 0),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            rate_limit: RateLimitConfig::from_env()?,
            recurrence: RecurrenceConfig::from_env(),
            notification: NotificationConfig::from_env(),
        })
    }
}

impl RecurrenceConfig {
    /// Load recurrence defaults from environment variables
    pub fn from_env() -> Self {
        Self {
            default_max_instances: parse_env("RECURRENCE_MAX_INSTANCES", DEFAULT_MAX_INSTANCES)
                .clamp(1, MAX_INSTANCES_HARD_CAP),
        }
    }
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            default_max_instances: DEFAULT_MAX_INSTANCES,
        }
    }
}

impl NotificationConfig {
    /// Load notification settings from environment variables
    pub fn from_env() -> Self {
        Self {
            webhook_url: env::var("REMINDER_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
            webhook_secret: env::var("REMINDER_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }
}

impl DatabaseConfig {
    /// Load database configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        Ok(Self {
            url,
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
            min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1),
            acquire_timeout: Duration::from_secs(parse_env("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)),
            idle_timeout: Duration::from_secs(parse_env("DATABASE_IDLE_TIMEOUT_SECS", 600)),
            max_lifetime: Duration::from_secs(parse_env("DATABASE_MAX_LIFETIME_SECS", 1800)),
        })
    }
}

/// Reads `key`, falling back to `default` when unset or unparsable
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Provider name as an environment variable segment (`google-maps` -> `GOOGLE_MAPS`)
fn env_segment(provider: &str) -> String {
    provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug)]
pub enum ConfigError {
    MissingDatabaseUrl,
    NoProviders,
    InvalidProvider { provider: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingDatabaseUrl => {
                write!(f, "DATABASE_URL environment variable is required")
            }
            ConfigError::NoProviders => {
                write!(f, "RATE_LIMIT_PROVIDERS must name at least one provider")
            }
            ConfigError::InvalidProvider { provider, reason } => {
                write!(f, "Invalid configuration for provider '{}': {}", provider, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
