//! Unit tests for rate limit admission decisions
//!
//! Token bucket conservation, quota gating, lazy resets, warning levels and
//! best-effort quota persistence, all driven by a manual clock.

use std::collections::HashMap;
use std::sync::Arc;

use cadence::clock::ManualClock;
use cadence::error::AppError;
use cadence::models::{Denial, WarningLevel};
use cadence::rate_limit::{QuotaUsage, RateLimitController};
use cadence::store::MemoryQuotaStore;
use chrono::{Duration, FixedOffset};
use pretty_assertions::assert_eq;

use crate::common::{at, provider, rate_limit_config, ControllerFixture};

// =============================================================================
// Token Bucket
// =============================================================================

#[tokio::test]
async fn test_tokens_drain_one_per_admission_then_refill_to_capacity() {
    let fixture = ControllerFixture::new(&[("maps", provider(5, 2.0, 1_000, 10_000))]).await;
    let limiter = &fixture.controller;

    for expected in [4.0, 3.0, 2.0, 1.0, 0.0] {
        let status = limiter.check_rate_limit("maps").await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.tokens_remaining, expected);
    }

    let denied = limiter.check_rate_limit("maps").await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.denial, Some(Denial::RateLimited));
    assert_eq!(denied.tokens_remaining, 0.0);
    assert_eq!(denied.retry_after_ms, Some(500));

    // capacity / refill_rate = 2.5s brings the bucket back to full
    fixture.clock.advance(Duration::milliseconds(2_500));
    assert_eq!(limiter.get_all_rate_limit_status()[0].tokens, 5.0);

    fixture.clock.advance(Duration::hours(1));
    assert_eq!(limiter.get_all_rate_limit_status()[0].tokens, 5.0);
}

#[tokio::test]
async fn test_denied_checks_do_not_count_toward_quota() {
    let fixture = ControllerFixture::new(&[("maps", provider(1, 1.0, 1_000, 10_000))]).await;

    assert!(fixture.controller.check_rate_limit("maps").await.unwrap().allowed);
    for _ in 0..5 {
        assert!(!fixture.controller.check_rate_limit("maps").await.unwrap().allowed);
    }

    let usage = fixture.controller.get_quota_usage("maps").unwrap();
    assert_eq!(usage.daily.used, 1);
    assert_eq!(usage.monthly.used, 1);
}

#[tokio::test]
async fn test_status_snapshot_never_consumes_tokens() {
    let fixture = ControllerFixture::new(&[
        ("weather", provider(3, 1.0, 100, 1_000)),
        ("maps", provider(4, 1.0, 100, 1_000)),
    ])
    .await;

    for _ in 0..10 {
        let statuses = fixture.controller.get_all_rate_limit_status();
        let names: Vec<&str> = statuses.iter().map(|s| s.provider.as_str()).collect();
        assert_eq!(names, vec!["maps", "weather"]);
        assert_eq!(statuses[0].tokens, 4.0);
        assert_eq!(statuses[1].tokens, 3.0);
    }
}

// =============================================================================
// Quota
// =============================================================================

#[tokio::test]
async fn test_daily_quota_overrides_full_bucket() {
    let fixture = ControllerFixture::new(&[("maps", provider(10, 1.0, 3, 10_000))]).await;

    for _ in 0..3 {
        assert!(fixture.controller.check_rate_limit("maps").await.unwrap().allowed);
    }

    let denied = fixture.controller.check_rate_limit("maps").await.unwrap();
    assert!(!denied.allowed);
    assert!(denied.is_quota_exceeded());
    assert_eq!(denied.denial, Some(Denial::DailyQuota));
    assert_eq!(denied.warning_level, WarningLevel::Critical);
    assert_eq!(denied.tokens_remaining, 7.0);
    // 09:00 until the next midnight
    assert_eq!(denied.retry_after_ms, Some(15 * 60 * 60 * 1000));

    let status = &fixture.controller.get_all_rate_limit_status()[0];
    assert_eq!(status.tokens, 7.0);
}

#[tokio::test]
async fn test_monthly_quota_denial_waits_for_next_month() {
    let fixture = ControllerFixture::new(&[("maps", provider(10, 1.0, 100, 2))]).await;

    assert!(fixture.controller.check_rate_limit("maps").await.unwrap().allowed);
    assert!(fixture.controller.check_rate_limit("maps").await.unwrap().allowed);

    let denied = fixture.controller.check_rate_limit("maps").await.unwrap();
    assert_eq!(denied.denial, Some(Denial::MonthlyQuota));
    assert_eq!(
        denied.retry_after_ms,
        Some((at(2024, 7, 1, 0, 0) - at(2024, 6, 10, 9, 0)).num_milliseconds() as u64)
    );

    // A new day does not help, a new month does
    fixture.clock.set(at(2024, 6, 11, 0, 30));
    assert!(!fixture.controller.check_rate_limit("maps").await.unwrap().allowed);
    fixture.clock.set(at(2024, 7, 1, 0, 0));
    assert!(fixture.controller.check_rate_limit("maps").await.unwrap().allowed);
}

#[tokio::test]
async fn test_quota_resets_once_per_boundary() {
    let fixture = ControllerFixture::new(&[("maps", provider(10, 1.0, 100, 1_000))]).await;
    let limiter = &fixture.controller;

    limiter.check_rate_limit("maps").await.unwrap();
    limiter.check_rate_limit("maps").await.unwrap();

    for _ in 0..20 {
        fixture.clock.advance(Duration::minutes(30));
        assert_eq!(limiter.get_quota_usage("maps").unwrap().daily.used, 2);
    }

    // 09:00 + 10h = 19:00; cross midnight
    fixture.clock.set(at(2024, 6, 11, 0, 1));
    let usage = limiter.get_quota_usage("maps").unwrap();
    assert_eq!(usage.daily.used, 0);
    assert_eq!(usage.monthly.used, 2);
    assert_eq!(usage.daily.reset_at, at(2024, 6, 12, 0, 0));

    limiter.check_rate_limit("maps").await.unwrap();
    for _ in 0..5 {
        assert_eq!(limiter.get_quota_usage("maps").unwrap().daily.used, 1);
    }
}

#[tokio::test]
async fn test_quota_boundaries_follow_configured_offset() {
    let mut config = rate_limit_config(&[("maps", provider(10, 1.0, 100, 1_000))]);
    config.quota_utc_offset_minutes = 120;
    let clock = Arc::new(ManualClock::new(at(2024, 6, 10, 9, 0)));
    let controller =
        RateLimitController::new(config, clock.clone(), Arc::new(MemoryQuotaStore::new()))
            .await
            .unwrap();

    let usage = controller.get_quota_usage("maps").unwrap();
    // Local midnight at UTC+2 is 22:00 UTC
    assert_eq!(usage.daily.reset_at, at(2024, 6, 10, 22, 0));
    assert_eq!(usage.monthly.reset_at, at(2024, 6, 30, 22, 0));
}

// =============================================================================
// Warning Levels
// =============================================================================

#[tokio::test]
async fn test_warning_levels_follow_usage_ratio() {
    let fixture = ControllerFixture::new(&[("maps", provider(20, 1.0, 10, 1_000))]).await;

    let mut levels = Vec::new();
    for _ in 0..10 {
        levels.push(
            fixture
                .controller
                .check_rate_limit("maps")
                .await
                .unwrap()
                .warning_level,
        );
    }

    let mut expected = vec![WarningLevel::None; 7];
    expected.extend([
        WarningLevel::Warning,
        WarningLevel::Warning,
        WarningLevel::Critical,
    ]);
    assert_eq!(levels, expected);
}

#[test]
fn test_unrestricted_tier_thresholds() {
    let tier = cadence::config::ProviderConfig::unrestricted();
    assert_eq!(
        WarningLevel::from_ratio(0.85, tier.quota.warning_threshold, tier.quota.alert_threshold),
        WarningLevel::None
    );
    assert_eq!(
        WarningLevel::from_ratio(0.95, tier.quota.warning_threshold, tier.quota.alert_threshold),
        WarningLevel::Warning
    );
    assert_eq!(
        WarningLevel::from_ratio(0.99, tier.quota.warning_threshold, tier.quota.alert_threshold),
        WarningLevel::Critical
    );
}

// =============================================================================
// Configuration Errors
// =============================================================================

#[tokio::test]
async fn test_unknown_provider_is_a_configuration_error() {
    let fixture = ControllerFixture::new(&[("maps", provider(5, 1.0, 100, 1_000))]).await;

    assert!(matches!(
        fixture.controller.check_rate_limit("geocoder").await,
        Err(AppError::Configuration(_))
    ));
    assert!(matches!(
        fixture.controller.get_quota_usage("geocoder"),
        Err(AppError::Configuration(_))
    ));
    assert!(matches!(
        fixture.controller.clear_queue("geocoder"),
        Err(AppError::Configuration(_))
    ));
    assert!(matches!(
        fixture.controller.enqueue("geocoder", 0, None),
        Err(AppError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_controller_requires_providers() {
    let result = RateLimitController::new(
        rate_limit_config(&[]),
        Arc::new(ManualClock::new(at(2024, 6, 10, 9, 0))),
        Arc::new(MemoryQuotaStore::new()),
    )
    .await;

    assert!(matches!(result, Err(AppError::Configuration(_))));
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_admissions_are_persisted() {
    let fixture = ControllerFixture::new(&[("maps", provider(5, 1.0, 100, 1_000))]).await;

    fixture.controller.check_rate_limit("maps").await.unwrap();
    fixture.controller.check_rate_limit("maps").await.unwrap();

    assert_eq!(fixture.store.save_count(), 2);
    assert_eq!(fixture.store.current().await["maps"].daily.used, 2);
}

#[tokio::test]
async fn test_persistence_failure_keeps_admission() {
    let fixture = ControllerFixture::new(&[("maps", provider(5, 1.0, 100, 1_000))]).await;
    fixture.store.fail_saves(true);

    let status = fixture.controller.check_rate_limit("maps").await.unwrap();

    assert!(status.allowed);
    assert_eq!(fixture.store.save_count(), 0);
    assert_eq!(fixture.controller.get_quota_usage("maps").unwrap().daily.used, 1);
}

#[tokio::test]
async fn test_saved_usage_is_restored_with_configured_limits() {
    let now = at(2024, 6, 10, 9, 0);
    let utc = FixedOffset::east_opt(0).unwrap();
    let mut saved = QuotaUsage::new(3, 50, now, utc);
    for _ in 0..3 {
        saved.record_admission();
    }
    let store = Arc::new(MemoryQuotaStore::with_snapshot(HashMap::from([(
        "maps".to_string(),
        saved,
    )])));

    let fixture =
        ControllerFixture::with_store(&[("maps", provider(10, 1.0, 5, 1_000))], store, now).await;

    let usage = fixture.controller.get_quota_usage("maps").unwrap();
    assert_eq!(usage.daily.used, 3);
    assert_eq!(usage.daily.limit, 5);
    assert_eq!(usage.monthly.limit, 1_000);

    assert!(fixture.controller.check_rate_limit("maps").await.unwrap().allowed);
    assert!(fixture.controller.check_rate_limit("maps").await.unwrap().allowed);
    assert!(!fixture.controller.check_rate_limit("maps").await.unwrap().allowed);
}

#[tokio::test]
async fn test_stale_saved_usage_resets_on_first_read() {
    let yesterday = at(2024, 6, 9, 18, 0);
    let utc = FixedOffset::east_opt(0).unwrap();
    let mut saved = QuotaUsage::new(3, 50, yesterday, utc);
    for _ in 0..3 {
        saved.record_admission();
    }
    let store = Arc::new(MemoryQuotaStore::with_snapshot(HashMap::from([(
        "maps".to_string(),
        saved,
    )])));

    let fixture = ControllerFixture::with_store(
        &[("maps", provider(10, 1.0, 3, 50))],
        store,
        at(2024, 6, 10, 9, 0),
    )
    .await;

    let status = fixture.controller.check_rate_limit("maps").await.unwrap();
    assert!(status.allowed);
    assert_eq!(status.daily_remaining, 2);
    assert_eq!(status.monthly_remaining, 46);
}
