//! Unit tests for configuration parsing
//!
//! Tests environment variable parsing, tier presets and validation.
//!
//! Note: These tests modify global environment variables and must run serially.

use cadence::config::{
    ConfigError, NotificationConfig, ProviderConfig, RateLimitConfig, RecurrenceConfig,
};
use pretty_assertions::assert_eq;
use serial_test::serial;

const PROVIDER_VARS: [&str; 10] = [
    "TIER",
    "REQUESTS_PER_MINUTE",
    "REQUESTS_PER_HOUR",
    "REQUESTS_PER_DAY",
    "BURST_CAPACITY",
    "REFILL_RATE",
    "DAILY_LIMIT",
    "MONTHLY_LIMIT",
    "WARNING_THRESHOLD",
    "ALERT_THRESHOLD",
];

fn clear_provider(segment: &str) {
    for suffix in PROVIDER_VARS {
        std::env::remove_var(format!("RATE_LIMIT_{}_{}", segment, suffix));
    }
}

fn clear_rate_limit_env() {
    std::env::remove_var("RATE_LIMIT_PROVIDERS");
    std::env::remove_var("RATE_LIMIT_REFILL_TICK_MS");
    std::env::remove_var("RATE_LIMIT_DRAIN_TICK_MS");
    std::env::remove_var("QUOTA_UTC_OFFSET_MINUTES");
    for segment in ["DEFAULT", "GOOGLE_MAPS", "WEATHER"] {
        clear_provider(segment);
    }
}

// =============================================================================
// Provider Config Tests
// =============================================================================

#[test]
#[serial]
fn test_provider_defaults_to_standard_tier() {
    clear_rate_limit_env();

    let config = ProviderConfig::from_env("weather").unwrap();

    assert_eq!(config, ProviderConfig::standard());
}

#[test]
#[serial]
fn test_provider_tier_and_overrides() {
    clear_rate_limit_env();
    std::env::set_var("RATE_LIMIT_GOOGLE_MAPS_TIER", "unrestricted");
    std::env::set_var("RATE_LIMIT_GOOGLE_MAPS_BURST_CAPACITY", "25");
    std::env::set_var("RATE_LIMIT_GOOGLE_MAPS_DAILY_LIMIT", "5000");

    let config = ProviderConfig::from_env("google-maps").unwrap();

    assert_eq!(config.rate_limit.burst_capacity, 25);
    assert_eq!(config.rate_limit.refill_rate, 10.0);
    assert_eq!(config.quota.daily_limit, 5000);
    assert_eq!(config.quota.monthly_limit, 3_000_000);
    assert_eq!(config.quota.warning_threshold, 0.9);

    clear_rate_limit_env();
}

#[test]
#[serial]
fn test_requests_per_minute_sets_refill_rate() {
    clear_rate_limit_env();
    std::env::set_var("RATE_LIMIT_WEATHER_REQUESTS_PER_MINUTE", "120");

    let config = ProviderConfig::from_env("weather").unwrap();
    assert_eq!(config.rate_limit.requests_per_minute, 120);
    assert_eq!(config.rate_limit.refill_rate, 2.0);

    // An explicit refill rate still wins
    std::env::set_var("RATE_LIMIT_WEATHER_REFILL_RATE", "0.5");
    let config = ProviderConfig::from_env("weather").unwrap();
    assert_eq!(config.rate_limit.refill_rate, 0.5);

    clear_rate_limit_env();
}

#[test]
#[serial]
fn test_unparsable_values_fall_back_to_defaults() {
    clear_rate_limit_env();
    std::env::set_var("RATE_LIMIT_WEATHER_DAILY_LIMIT", "lots");
    std::env::set_var("RATE_LIMIT_WEATHER_BURST_CAPACITY", "-3");

    let config = ProviderConfig::from_env("weather").unwrap();
    assert_eq!(config.quota.daily_limit, 1_000);
    assert_eq!(config.rate_limit.burst_capacity, 10);

    clear_rate_limit_env();
}

#[test]
#[serial]
fn test_invalid_provider_values_are_rejected() {
    clear_rate_limit_env();
    std::env::set_var("RATE_LIMIT_WEATHER_BURST_CAPACITY", "0");

    assert!(matches!(
        ProviderConfig::from_env("weather"),
        Err(ConfigError::InvalidProvider { provider, .. }) if provider == "weather"
    ));

    clear_provider("WEATHER");
    std::env::set_var("RATE_LIMIT_WEATHER_WARNING_THRESHOLD", "0.99");
    std::env::set_var("RATE_LIMIT_WEATHER_ALERT_THRESHOLD", "0.5");
    assert!(ProviderConfig::from_env("weather").is_err());

    clear_rate_limit_env();
}

#[test]
fn test_validate_rejects_non_positive_refill() {
    let mut config = ProviderConfig::standard();
    config.rate_limit.refill_rate = 0.0;
    assert!(config.validate("maps").is_err());

    config.rate_limit.refill_rate = f64::NAN;
    assert!(config.validate("maps").is_err());
}

// =============================================================================
// Rate Limit Config Tests
// =============================================================================

#[test]
#[serial]
fn test_rate_limit_config_defaults() {
    clear_rate_limit_env();

    let config = RateLimitConfig::from_env().unwrap();

    assert_eq!(config.providers.len(), 1);
    assert_eq!(config.provider("default"), Some(&ProviderConfig::standard()));
    assert_eq!(config.refill_tick.as_millis(), 1000);
    assert_eq!(config.drain_tick.as_millis(), 250);
    assert_eq!(config.quota_utc_offset_minutes, 0);
}

#[test]
#[serial]
fn test_rate_limit_config_lists_providers() {
    clear_rate_limit_env();
    std::env::set_var("RATE_LIMIT_PROVIDERS", "google-maps, weather,,");
    std::env::set_var("RATE_LIMIT_WEATHER_TIER", "unrestricted");
    std::env::set_var("RATE_LIMIT_DRAIN_TICK_MS", "100");
    std::env::set_var("QUOTA_UTC_OFFSET_MINUTES", "-300");

    let config = RateLimitConfig::from_env().unwrap();

    let mut names: Vec<&String> = config.providers.keys().collect();
    names.sort();
    assert_eq!(names, vec!["google-maps", "weather"]);
    assert_eq!(
        config.provider("weather"),
        Some(&ProviderConfig::unrestricted())
    );
    assert_eq!(config.drain_tick.as_millis(), 100);
    assert_eq!(config.quota_offset().local_minus_utc(), -300 * 60);

    clear_rate_limit_env();
}

#[test]
#[serial]
fn test_rate_limit_config_requires_a_provider() {
    clear_rate_limit_env();
    std::env::set_var("RATE_LIMIT_PROVIDERS", " , ");

    assert!(matches!(
        RateLimitConfig::from_env(),
        Err(ConfigError::NoProviders)
    ));

    clear_rate_limit_env();
}

#[test]
fn test_out_of_range_offset_falls_back_to_utc() {
    let config = RateLimitConfig {
        quota_utc_offset_minutes: 48 * 60,
        ..RateLimitConfig::default()
    };
    assert_eq!(config.quota_offset().local_minus_utc(), 0);
}

// =============================================================================
// Recurrence & Notification Config Tests
// =============================================================================

#[test]
#[serial]
fn test_recurrence_max_instances_is_clamped() {
    std::env::remove_var("RECURRENCE_MAX_INSTANCES");
    assert_eq!(RecurrenceConfig::from_env().default_max_instances, 100);

    std::env::set_var("RECURRENCE_MAX_INSTANCES", "250");
    assert_eq!(RecurrenceConfig::from_env().default_max_instances, 250);

    std::env::set_var("RECURRENCE_MAX_INSTANCES", "50000");
    assert_eq!(RecurrenceConfig::from_env().default_max_instances, 1000);

    std::env::set_var("RECURRENCE_MAX_INSTANCES", "0");
    assert_eq!(RecurrenceConfig::from_env().default_max_instances, 1);

    std::env::remove_var("RECURRENCE_MAX_INSTANCES");
}

#[test]
#[serial]
fn test_notification_config_ignores_empty_values() {
    std::env::set_var("REMINDER_WEBHOOK_URL", "");
    std::env::remove_var("REMINDER_WEBHOOK_SECRET");
    assert_eq!(NotificationConfig::from_env(), NotificationConfig::default());

    std::env::set_var("REMINDER_WEBHOOK_URL", "https://hooks.example.com/reminders");
    std::env::set_var("REMINDER_WEBHOOK_SECRET", "s3cret");
    let config = NotificationConfig::from_env();
    assert_eq!(
        config.webhook_url.as_deref(),
        Some("https://hooks.example.com/reminders")
    );
    assert_eq!(config.webhook_secret.as_deref(), Some("s3cret"));

    std::env::remove_var("REMINDER_WEBHOOK_URL");
    std::env::remove_var("REMINDER_WEBHOOK_SECRET");
}
