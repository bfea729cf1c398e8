use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{
    Event, EventFilter, EventLink, EventUpdate, NewEvent, RecurrencePattern, RecurrenceRule,
    RecurrenceRuleConfig,
};
use crate::recurrence::{plan_occurrences, GenerateOptions, DEFAULT_MAX_INSTANCES};
use crate::services::hooks::{CommittedSeries, SeriesHook};
use crate::store::EventStore;

// =============================================================================
// Options & Results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Materialize instances right away
    #[serde(default = "default_true")]
    pub generate_instances: bool,
    /// Expansion bound; the service default applies when absent
    #[serde(default)]
    pub max_instances: Option<usize>,
    /// Register reminders this many minutes before each occurrence
    #[serde(default)]
    pub reminder_minutes: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            generate_instances: true,
            max_instances: None,
            reminder_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Apply the field changes to existing instances as well
    #[serde(default)]
    pub update_instances: bool,
    /// Drop all instances and expand the series again
    #[serde(default)]
    pub regenerate_instances: bool,
    /// With `update_instances`, leave instances before today untouched
    #[serde(default)]
    pub update_future_only: bool,
    #[serde(default)]
    pub max_instances: Option<usize>,
    #[serde(default)]
    pub reminder_minutes: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Only delete instances dated today or later
    #[serde(default)]
    pub future_only: bool,
}

/// Changes to a recurring event: its fields and optionally its rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurringEventUpdate {
    #[serde(default)]
    pub event: EventUpdate,
    /// Replacement rule, validated before anything is written
    #[serde(default)]
    pub rule: Option<RecurrenceRuleConfig>,
}

/// A parent event with its rule and current instances
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringEvent {
    pub event: Event,
    pub rule: RecurrenceRule,
    pub instances: Vec<Event>,
}

// =============================================================================
// Service
// =============================================================================

/// Creates, edits and expands recurring series on top of an `EventStore`.
///
/// No operation is atomic across store calls. A failure halfway through an
/// expansion leaves the instances written so far; regenerating the series
/// recovers from it.
pub struct RecurringEventService {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    hooks: Vec<Arc<dyn SeriesHook>>,
    default_max_instances: usize,
}

impl RecurringEventService {
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            hooks: Vec::new(),
            default_max_instances: DEFAULT_MAX_INSTANCES,
        }
    }

    /// Subscribes a hook to committed series
    pub fn with_hook(mut self, hook: Arc<dyn SeriesHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_default_max_instances(mut self, max_instances: usize) -> Self {
        self.default_max_instances = max_instances;
        self
    }

    /// Materializes the occurrences of `parent` allowed by `options`
    pub async fn generate_instances(
        &self,
        parent: &Event,
        pattern: &RecurrencePattern,
        options: &GenerateOptions,
    ) -> AppResult<Vec<Event>> {
        let dates = plan_occurrences(parent.date, pattern, options)?;

        let mut instances = Vec::with_capacity(dates.len());
        for date in dates {
            instances.push(self.store.create_event(parent.instance_on(date)).await?);
        }

        log::debug!(
            "Generated {} instance(s) for event {}",
            instances.len(),
            parent.id
        );
        Ok(instances)
    }

    /// Creates a rule, its parent event and (optionally) the first instances
    pub async fn create_recurring_event(
        &self,
        event: NewEvent,
        rule_config: &RecurrenceRuleConfig,
        options: CreateOptions,
    ) -> AppResult<RecurringEvent> {
        // 1. Validate before touching the store
        let pattern = rule_config.validate()?;

        // 2. Rule, then the parent referencing it
        let rule = self.store.create_rule(pattern).await?;
        let parent = self
            .store
            .create_event(NewEvent {
                link: EventLink::Parent { rule_id: rule.id },
                ..event
            })
            .await?;

        // 3. Instances
        let instances = if options.generate_instances {
            let generate = self.generate_options(options.max_instances);
            self.generate_instances(&parent, &rule.pattern, &generate)
                .await?
        } else {
            Vec::new()
        };

        log::info!(
            "Created recurring event {} ({}, {} instance(s))",
            parent.id,
            rule.pattern.frequency,
            instances.len()
        );

        self.run_hooks(&parent, &instances, options.reminder_minutes)
            .await;

        Ok(RecurringEvent {
            event: parent,
            rule,
            instances,
        })
    }

    /// Updates a recurring event and, depending on `options`, its instances
    pub async fn update_recurring_event(
        &self,
        event_id: Uuid,
        update: RecurringEventUpdate,
        options: UpdateOptions,
    ) -> AppResult<RecurringEvent> {
        let new_pattern = update
            .rule
            .as_ref()
            .map(RecurrenceRuleConfig::validate)
            .transpose()?;

        let (event, mut rule) = self.load_series(event_id).await?;

        // Parent always first
        let parent = if update.event.is_empty() {
            event
        } else {
            self.store.update_event(event_id, &update.event).await?
        };
        if let Some(pattern) = new_pattern {
            rule = self.store.update_rule(rule.id, pattern).await?;
        }

        let all_instances = EventFilter::instances_of(parent.id);

        let instances = if options.regenerate_instances {
            let removed = self.store.delete_events(all_instances).await?;
            let generate = self.generate_options(options.max_instances);
            let instances = self
                .generate_instances(&parent, &rule.pattern, &generate)
                .await?;

            log::info!(
                "Regenerated event {}: {} instance(s) replaced by {}",
                parent.id,
                removed,
                instances.len()
            );
            self.run_hooks(&parent, &instances, options.reminder_minutes)
                .await;
            instances
        } else {
            if options.update_instances {
                let instance_update = update.event.without_date();
                if !instance_update.is_empty() {
                    let filter = if options.update_future_only {
                        all_instances.starting(self.clock.today())
                    } else {
                        all_instances
                    };
                    let changed = self.store.update_events(filter, &instance_update).await?;
                    log::info!("Updated {} instance(s) of event {}", changed, parent.id);
                }
            }
            self.store.query_events(all_instances).await?
        };

        Ok(RecurringEvent {
            event: parent,
            rule,
            instances,
        })
    }

    /// Excludes `date` from the series and deletes the instance on that date
    pub async fn add_exception_date(
        &self,
        event_id: Uuid,
        date: chrono::NaiveDate,
    ) -> AppResult<RecurrenceRule> {
        let (event, rule) = self.load_series(event_id).await?;

        let mut pattern = rule.pattern;
        if !pattern.is_exception(date) {
            pattern.exception_dates.push(date);
            pattern.exception_dates.sort_unstable();
        }
        let rule = self.store.update_rule(rule.id, pattern).await?;

        let removed = self
            .store
            .delete_events(EventFilter::instances_of(event.id).on(date))
            .await?;

        log::info!(
            "Added exception {} to event {} ({} instance(s) removed)",
            date,
            event.id,
            removed
        );
        Ok(rule)
    }

    /// Deletes the instances of a parent, returning how many were removed
    pub async fn delete_recurring_instances(
        &self,
        parent_id: Uuid,
        options: DeleteOptions,
    ) -> AppResult<u64> {
        let mut filter = EventFilter::instances_of(parent_id);
        if options.future_only {
            filter = filter.starting(self.clock.today());
        }

        let removed = self.store.delete_events(filter).await?;
        log::info!("Deleted {} instance(s) of event {}", removed, parent_id);
        Ok(removed)
    }

    /// Loads an event and its rule, rejecting events that are not series parents
    async fn load_series(&self, event_id: Uuid) -> AppResult<(Event, RecurrenceRule)> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {}", event_id)))?;

        let rule_id = event.recurrence_rule_id().ok_or_else(|| {
            AppError::Validation(format!("Event {} is not a recurring event", event_id))
        })?;

        let rule = self
            .store
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Recurrence rule {}", rule_id)))?;

        Ok((event, rule))
    }

    fn generate_options(&self, max_instances: Option<usize>) -> GenerateOptions {
        GenerateOptions::new(max_instances.unwrap_or(self.default_max_instances))
    }

    async fn run_hooks(&self, parent: &Event, instances: &[Event], reminder_minutes: Option<u32>) {
        let series = CommittedSeries {
            parent,
            instances,
            reminder_minutes,
        };
        for hook in &self.hooks {
            hook.on_series_committed(&series).await;
        }
    }
}
