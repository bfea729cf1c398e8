//! In-process store adapters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{EventStore, QuotaStore, StoreError, StoreResult};
use crate::models::{Event, EventFilter, EventUpdate, NewEvent, RecurrencePattern, RecurrenceRule};
use crate::rate_limit::QuotaUsage;

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<Uuid, Event>>,
    rules: RwLock<HashMap<Uuid, RecurrenceRule>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create_event(&self, event: NewEvent) -> StoreResult<Event> {
        let now = Utc::now();
        let stored = Event {
            id: Uuid::new_v4(),
            title: event.title,
            description: event.description,
            location: event.location,
            date: event.date,
            start_time: event.start_time,
            end_time: event.end_time,
            all_day: event.all_day,
            link: event.link,
            created_at: now,
            updated_at: now,
        };
        self.events.write().await.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.events.read().await.get(&id).cloned())
    }

    async fn update_event(&self, id: Uuid, update: &EventUpdate) -> StoreResult<Event> {
        let mut events = self.events.write().await;
        let event = events.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "Event",
            id,
        })?;
        update.apply_to(event);
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn update_events(&self, filter: EventFilter, update: &EventUpdate) -> StoreResult<u64> {
        let now = Utc::now();
        let mut count = 0;
        for event in self.events.write().await.values_mut() {
            if filter.matches(event) {
                update.apply_to(event);
                event.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_events(&self, filter: EventFilter) -> StoreResult<u64> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|_, event| !filter.matches(event));
        Ok((before - events.len()) as u64)
    }

    async fn query_events(&self, filter: EventFilter) -> StoreResult<Vec<Event>> {
        let mut found: Vec<Event> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        Ok(found)
    }

    async fn create_rule(&self, pattern: RecurrencePattern) -> StoreResult<RecurrenceRule> {
        let now = Utc::now();
        let rule = RecurrenceRule {
            id: Uuid::new_v4(),
            pattern,
            created_at: now,
            updated_at: now,
        };
        self.rules.write().await.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn get_rule(&self, id: Uuid) -> StoreResult<Option<RecurrenceRule>> {
        Ok(self.rules.read().await.get(&id).cloned())
    }

    async fn update_rule(
        &self,
        id: Uuid,
        pattern: RecurrencePattern,
    ) -> StoreResult<RecurrenceRule> {
        let mut rules = self.rules.write().await;
        let rule = rules.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "RecurrenceRule",
            id,
        })?;
        rule.pattern = pattern;
        rule.updated_at = Utc::now();
        Ok(rule.clone())
    }
}

/// Quota snapshot held in memory; optionally fails saves for testing the
/// best-effort persistence path
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    snapshot: RwLock<HashMap<String, QuotaUsage>>,
    fail_saves: AtomicBool,
    saves: AtomicU64,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `snapshot`
    pub fn with_snapshot(snapshot: HashMap<String, QuotaUsage>) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            ..Self::default()
        }
    }

    /// Makes every subsequent save fail
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn current(&self) -> HashMap<String, QuotaUsage> {
        self.snapshot.read().await.clone()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load_snapshot(&self) -> StoreResult<HashMap<String, QuotaUsage>> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save_snapshot(&self, snapshot: &HashMap<String, QuotaUsage>) -> StoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("quota store unavailable".to_string()));
        }
        *self.snapshot.write().await = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
