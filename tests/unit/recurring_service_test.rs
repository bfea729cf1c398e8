//! Unit tests for the recurring event service
//!
//! Runs the service against the in-memory store with a pinned clock.

use std::sync::Arc;

use cadence::error::AppError;
use cadence::models::{
    EndType, EventFilter, EventLink, EventUpdate, Frequency, NewEvent, RecurrenceRuleConfig,
    WeekdayCode,
};
use cadence::services::{
    CreateOptions, DeleteOptions, RecurringEventUpdate, ReminderHook, SeriesHook, UpdateOptions,
};
use cadence::store::EventStore;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use cadence::clock::ManualClock;
use cadence::services::RecurringEventService;

use crate::common::{d, FlakyEventStore, RecordingHook, RecordingNotifier, ServiceFixture};

fn daily_count(count: u32) -> RecurrenceRuleConfig {
    let mut config = RecurrenceRuleConfig::new(Frequency::Daily);
    config.end_type = EndType::Count;
    config.end_count = Some(count);
    config
}

async fn instance_dates(fixture: &ServiceFixture, parent_id: uuid::Uuid) -> Vec<NaiveDate> {
    fixture
        .store
        .query_events(EventFilter::instances_of(parent_id))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.date)
        .collect()
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn test_create_recurring_event_links_parent_and_instances() {
    let fixture = ServiceFixture::new(d(2024, 3, 1));
    let mut rule = RecurrenceRuleConfig::new(Frequency::Weekly);
    rule.by_day = vec![WeekdayCode::Mo, WeekdayCode::We, WeekdayCode::Fr];
    rule.end_type = EndType::Count;
    rule.end_count = Some(4);

    let mut event = NewEvent::new("Gym", d(2024, 3, 4));
    event.location = Some("Downtown".to_string());

    let created = fixture
        .service
        .create_recurring_event(event, &rule, CreateOptions::default())
        .await
        .unwrap();

    assert_eq!(
        created.event.link,
        EventLink::Parent {
            rule_id: created.rule.id
        }
    );
    assert_eq!(
        created.instances.iter().map(|e| e.date).collect::<Vec<_>>(),
        vec![d(2024, 3, 6), d(2024, 3, 8), d(2024, 3, 11), d(2024, 3, 13)]
    );
    for instance in &created.instances {
        assert_eq!(instance.parent_event_id(), Some(created.event.id));
        assert_eq!(instance.recurrence_rule_id(), None);
        assert_eq!(instance.title, "Gym");
        assert_eq!(instance.location.as_deref(), Some("Downtown"));
        assert_ne!(instance.id, created.event.id);
    }
    assert_eq!(fixture.store.len().await, 5);
}

#[tokio::test]
async fn test_create_without_generation_stores_only_parent() {
    let fixture = ServiceFixture::new(d(2024, 3, 1));
    let options = CreateOptions {
        generate_instances: false,
        ..CreateOptions::default()
    };

    let created = fixture
        .service
        .create_recurring_event(NewEvent::new("Review", d(2024, 3, 4)), &daily_count(5), options)
        .await
        .unwrap();

    assert!(created.instances.is_empty());
    assert_eq!(fixture.store.len().await, 1);
}

#[tokio::test]
async fn test_create_respects_max_instances() {
    let fixture = ServiceFixture::new(d(2024, 3, 1));
    let options = CreateOptions {
        max_instances: Some(5),
        ..CreateOptions::default()
    };

    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Log", d(2024, 3, 1)),
            &RecurrenceRuleConfig::new(Frequency::Daily),
            options,
        )
        .await
        .unwrap();

    // The parent's own date uses one of the five iterations
    assert_eq!(created.instances.len(), 4);
}

#[tokio::test]
async fn test_invalid_rule_writes_nothing() {
    let fixture = ServiceFixture::new(d(2024, 3, 1));
    let mut rule = RecurrenceRuleConfig::new(Frequency::Daily);
    rule.end_type = EndType::Date;

    let result = fixture
        .service
        .create_recurring_event(NewEvent::new("Broken", d(2024, 3, 4)), &rule, CreateOptions::default())
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(fixture.store.is_empty().await);
}

// =============================================================================
// Update
// =============================================================================

#[tokio::test]
async fn test_update_standalone_event_is_rejected() {
    let fixture = ServiceFixture::new(d(2024, 3, 1));
    let standalone = fixture
        .store
        .create_event(NewEvent::new("One-off", d(2024, 3, 4)))
        .await
        .unwrap();

    let result = fixture
        .service
        .update_recurring_event(
            standalone.id,
            RecurringEventUpdate::default(),
            UpdateOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_update_missing_event_is_not_found() {
    let fixture = ServiceFixture::new(d(2024, 3, 1));
    let result = fixture
        .service
        .update_recurring_event(
            uuid::Uuid::new_v4(),
            RecurringEventUpdate::default(),
            UpdateOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_update_future_instances_only() {
    let fixture = ServiceFixture::new(d(2024, 1, 15));
    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Standup", d(2024, 1, 10)),
            &daily_count(10),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    let update = RecurringEventUpdate {
        event: EventUpdate {
            title: Some("Standup (remote)".to_string()),
            ..EventUpdate::default()
        },
        rule: None,
    };
    let options = UpdateOptions {
        update_instances: true,
        update_future_only: true,
        ..UpdateOptions::default()
    };

    let updated = fixture
        .service
        .update_recurring_event(created.event.id, update, options)
        .await
        .unwrap();

    assert_eq!(updated.event.title, "Standup (remote)");
    for instance in &updated.instances {
        let expected = if instance.date >= d(2024, 1, 15) {
            "Standup (remote)"
        } else {
            "Standup"
        };
        assert_eq!(instance.title, expected, "instance on {}", instance.date);
    }
}

#[tokio::test]
async fn test_instance_update_never_moves_instance_dates() {
    let fixture = ServiceFixture::new(d(2024, 1, 1));
    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Sync", d(2024, 1, 1)),
            &daily_count(3),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    let update = RecurringEventUpdate {
        event: EventUpdate {
            date: Some(d(2024, 2, 1)),
            all_day: Some(true),
            ..EventUpdate::default()
        },
        rule: None,
    };
    let options = UpdateOptions {
        update_instances: true,
        ..UpdateOptions::default()
    };

    let updated = fixture
        .service
        .update_recurring_event(created.event.id, update, options)
        .await
        .unwrap();

    assert_eq!(updated.event.date, d(2024, 2, 1));
    assert_eq!(
        updated.instances.iter().map(|e| e.date).collect::<Vec<_>>(),
        vec![d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)]
    );
    assert!(updated.instances.iter().all(|e| e.all_day));
}

#[tokio::test]
async fn test_regenerate_unchanged_rule_reproduces_dates() {
    let fixture = ServiceFixture::new(d(2024, 1, 1));
    let mut rule = RecurrenceRuleConfig::new(Frequency::Monthly);
    rule.by_day = vec![WeekdayCode::Tu];
    rule.by_set_pos = Some(2);
    rule.end_type = EndType::Count;
    rule.end_count = Some(6);

    let created = fixture
        .service
        .create_recurring_event(NewEvent::new("Board", d(2024, 1, 9)), &rule, CreateOptions::default())
        .await
        .unwrap();
    let original: Vec<NaiveDate> = created.instances.iter().map(|e| e.date).collect();

    let options = UpdateOptions {
        regenerate_instances: true,
        ..UpdateOptions::default()
    };
    let regenerated = fixture
        .service
        .update_recurring_event(created.event.id, RecurringEventUpdate::default(), options)
        .await
        .unwrap();

    assert_eq!(
        regenerated.instances.iter().map(|e| e.date).collect::<Vec<_>>(),
        original
    );
    assert_eq!(instance_dates(&fixture, created.event.id).await, original);
    assert!(regenerated
        .instances
        .iter()
        .all(|e| created.instances.iter().all(|old| old.id != e.id)));
}

#[tokio::test]
async fn test_regenerate_with_replacement_rule() {
    let fixture = ServiceFixture::new(d(2024, 1, 1));
    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Water plants", d(2024, 1, 1)),
            &daily_count(10),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    let mut weekly = RecurrenceRuleConfig::new(Frequency::Weekly);
    weekly.end_type = EndType::Count;
    weekly.end_count = Some(2);

    let options = UpdateOptions {
        regenerate_instances: true,
        ..UpdateOptions::default()
    };
    let updated = fixture
        .service
        .update_recurring_event(
            created.event.id,
            RecurringEventUpdate {
                event: EventUpdate::default(),
                rule: Some(weekly),
            },
            options,
        )
        .await
        .unwrap();

    assert_eq!(updated.rule.id, created.rule.id);
    assert_eq!(updated.rule.pattern.frequency, Frequency::Weekly);
    assert_eq!(
        instance_dates(&fixture, created.event.id).await,
        vec![d(2024, 1, 8), d(2024, 1, 15)]
    );
}

#[tokio::test]
async fn test_invalid_replacement_rule_leaves_event_untouched() {
    let fixture = ServiceFixture::new(d(2024, 1, 1));
    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Stretch", d(2024, 1, 1)),
            &daily_count(2),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    let mut bad = RecurrenceRuleConfig::new(Frequency::Daily);
    bad.interval = 0;

    let result = fixture
        .service
        .update_recurring_event(
            created.event.id,
            RecurringEventUpdate {
                event: EventUpdate {
                    title: Some("Renamed".to_string()),
                    ..EventUpdate::default()
                },
                rule: Some(bad),
            },
            UpdateOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    let parent = fixture.store.get_event(created.event.id).await.unwrap().unwrap();
    assert_eq!(parent.title, "Stretch");
}

// =============================================================================
// Exceptions & Deletion
// =============================================================================

#[tokio::test]
async fn test_add_exception_date_removes_only_that_instance() {
    let fixture = ServiceFixture::new(d(2024, 1, 1));
    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Lunch", d(2024, 1, 1)),
            &daily_count(4),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    fixture
        .service
        .add_exception_date(created.event.id, d(2024, 1, 3))
        .await
        .unwrap();
    // Adding the same date again is harmless
    let rule = fixture
        .service
        .add_exception_date(created.event.id, d(2024, 1, 3))
        .await
        .unwrap();

    assert_eq!(rule.pattern.exception_dates, vec![d(2024, 1, 3)]);
    assert_eq!(
        instance_dates(&fixture, created.event.id).await,
        vec![d(2024, 1, 2), d(2024, 1, 4), d(2024, 1, 5)]
    );
    assert!(fixture
        .store
        .get_event(created.event.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_regeneration_honours_exceptions() {
    let fixture = ServiceFixture::new(d(2024, 1, 1));
    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Yoga", d(2024, 1, 1)),
            &daily_count(3),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    fixture
        .service
        .add_exception_date(created.event.id, d(2024, 1, 2))
        .await
        .unwrap();

    let options = UpdateOptions {
        regenerate_instances: true,
        ..UpdateOptions::default()
    };
    fixture
        .service
        .update_recurring_event(created.event.id, RecurringEventUpdate::default(), options)
        .await
        .unwrap();

    assert_eq!(
        instance_dates(&fixture, created.event.id).await,
        vec![d(2024, 1, 3), d(2024, 1, 4), d(2024, 1, 5)]
    );
}

#[tokio::test]
async fn test_delete_recurring_instances() {
    let fixture = ServiceFixture::new(d(2024, 1, 5));
    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Walk", d(2024, 1, 1)),
            &daily_count(8),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    let future = fixture
        .service
        .delete_recurring_instances(created.event.id, DeleteOptions { future_only: true })
        .await
        .unwrap();
    assert_eq!(future, 5);
    assert_eq!(
        instance_dates(&fixture, created.event.id).await,
        vec![d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)]
    );

    let rest = fixture
        .service
        .delete_recurring_instances(created.event.id, DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(rest, 3);
    assert_eq!(fixture.store.len().await, 1);
}

// =============================================================================
// Hooks
// =============================================================================

#[tokio::test]
async fn test_hooks_run_on_create_and_regenerate() {
    let hook = Arc::new(RecordingHook::default());
    let fixture = ServiceFixture::with_hooks(d(2024, 1, 1), vec![hook.clone() as Arc<dyn SeriesHook>]);

    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Pills", d(2024, 1, 1)),
            &daily_count(3),
            CreateOptions {
                reminder_minutes: Some(15),
                ..CreateOptions::default()
            },
        )
        .await
        .unwrap();

    fixture
        .service
        .update_recurring_event(
            created.event.id,
            RecurringEventUpdate::default(),
            UpdateOptions {
                regenerate_instances: true,
                ..UpdateOptions::default()
            },
        )
        .await
        .unwrap();

    let calls = hook.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![(created.event.id, 3, Some(15)), (created.event.id, 3, None)]
    );
}

#[tokio::test]
async fn test_reminder_failure_does_not_abort_creation() {
    let notifier = Arc::new(RecordingNotifier {
        fail_on: vec![d(2024, 1, 3)],
        ..RecordingNotifier::default()
    });
    let hook = Arc::new(ReminderHook::new(notifier.clone()));
    let fixture = ServiceFixture::with_hooks(d(2024, 1, 1), vec![hook as Arc<dyn SeriesHook>]);

    let created = fixture
        .service
        .create_recurring_event(
            NewEvent::new("Call mum", d(2024, 1, 1)),
            &daily_count(4),
            CreateOptions {
                reminder_minutes: Some(30),
                ..CreateOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(created.instances.len(), 4);

    let mut scheduled: Vec<NaiveDate> = notifier
        .scheduled
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.starts_at.date())
        .collect();
    scheduled.sort();
    assert_eq!(
        scheduled,
        vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 4), d(2024, 1, 5)]
    );

    let mut notified: Vec<NaiveDate> = notifier
        .notified
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.date)
        .collect();
    notified.sort();
    assert_eq!(notified, scheduled);
}

// =============================================================================
// Store Failures
// =============================================================================

fn flaky_service(
    today: NaiveDate,
) -> (RecurringEventService, Arc<FlakyEventStore>, Arc<RecordingHook>) {
    let store = Arc::new(FlakyEventStore::new());
    let clock = Arc::new(ManualClock::new(
        today.and_hms_opt(12, 0, 0).unwrap().and_utc(),
    ));
    let hook = Arc::new(RecordingHook::default());
    let service = RecurringEventService::new(store.clone(), clock)
        .with_hook(hook.clone() as Arc<dyn SeriesHook>);
    (service, store, hook)
}

#[tokio::test]
async fn test_create_propagates_store_failure_and_keeps_written_instances() {
    let (service, store, hook) = flaky_service(d(2024, 1, 1));
    // Parent and two instances get through
    store.fail_after(3);

    let result = service
        .create_recurring_event(
            NewEvent::new("Standup", d(2024, 1, 1)),
            &daily_count(5),
            CreateOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(AppError::Store(_))));
    assert_eq!(store.inner.len().await, 3);

    let parent = store
        .inner
        .query_events(EventFilter::default())
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.recurrence_rule_id().is_some())
        .unwrap();
    let dates: Vec<NaiveDate> = store
        .query_events(EventFilter::instances_of(parent.id))
        .await
        .unwrap()
        .iter()
        .map(|e| e.date)
        .collect();
    assert_eq!(dates, vec![d(2024, 1, 2), d(2024, 1, 3)]);

    assert!(hook.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_regenerate_propagates_store_failure_and_keeps_written_instances() {
    let (service, store, hook) = flaky_service(d(2024, 1, 1));
    let created = service
        .create_recurring_event(
            NewEvent::new("Standup", d(2024, 1, 1)),
            &daily_count(4),
            CreateOptions::default(),
        )
        .await
        .unwrap();
    store.fail_after(2);

    let result = service
        .update_recurring_event(
            created.event.id,
            RecurringEventUpdate::default(),
            UpdateOptions {
                regenerate_instances: true,
                ..UpdateOptions::default()
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::Store(_))));

    let dates: Vec<NaiveDate> = store
        .query_events(EventFilter::instances_of(created.event.id))
        .await
        .unwrap()
        .iter()
        .map(|e| e.date)
        .collect();
    assert_eq!(dates, vec![d(2024, 1, 2), d(2024, 1, 3)]);

    // Only the successful create reached the hook
    assert_eq!(hook.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_oversized_interval_rejected_before_store_is_touched() {
    let (service, store, _hook) = flaky_service(d(2024, 1, 1));
    let mut rule = RecurrenceRuleConfig::new(Frequency::Yearly);
    rule.interval = u32::MAX;

    let result = service
        .create_recurring_event(
            NewEvent::new("Anniversary", d(2024, 1, 15)),
            &rule,
            CreateOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(store.inner.is_empty().await);
}
