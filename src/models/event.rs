use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an event relates to a recurring series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventLink {
    /// One-off event
    Standalone,
    /// Owns a recurrence rule
    Parent { rule_id: Uuid },
    /// Materialized occurrence of a parent
    Instance {
        parent_id: Uuid,
        instance_date: NaiveDate,
    },
}

/// Calendar event as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub all_day: bool,
    pub link: EventLink,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Rule owned by this event, if it is a parent
    pub fn recurrence_rule_id(&self) -> Option<Uuid> {
        match self.link {
            EventLink::Parent { rule_id } => Some(rule_id),
            _ => None,
        }
    }

    /// Parent of this event, if it is an instance
    pub fn parent_event_id(&self) -> Option<Uuid> {
        match self.link {
            EventLink::Instance { parent_id, .. } => Some(parent_id),
            _ => None,
        }
    }

    /// Builds the record for one occurrence of this event.
    ///
    /// Everything is copied except identity, linkage, date and timestamps,
    /// which the store assigns.
    pub fn instance_on(&self, date: NaiveDate) -> NewEvent {
        NewEvent {
            title: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            date,
            start_time: self.start_time,
            end_time: self.end_time,
            all_day: self.all_day,
            link: EventLink::Instance {
                parent_id: self.id,
                instance_date: date,
            },
        }
    }
}

/// DTO for creating an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default = "default_link")]
    pub link: EventLink,
}

fn default_link() -> EventLink {
    EventLink::Standalone
}

impl NewEvent {
    /// Standalone event on `date`
    pub fn new(title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            description: None,
            location: None,
            date,
            start_time: None,
            end_time: None,
            all_day: false,
            link: EventLink::Standalone,
        }
    }
}

/// DTO for updating events; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub all_day: Option<bool>,
}

impl EventUpdate {
    pub fn is_empty(&self) -> bool {
        *self == EventUpdate::default()
    }

    /// Same update without the date change, for bulk instance updates
    pub fn without_date(&self) -> Self {
        Self {
            date: None,
            ..self.clone()
        }
    }

    /// Applies the set fields to `event`
    pub fn apply_to(&self, event: &mut Event) {
        if let Some(ref title) = self.title {
            event.title = title.clone();
        }
        if let Some(ref description) = self.description {
            event.description = Some(description.clone());
        }
        if let Some(ref location) = self.location {
            event.location = Some(location.clone());
        }
        if let Some(date) = self.date {
            event.date = date;
        }
        if let Some(start_time) = self.start_time {
            event.start_time = Some(start_time);
        }
        if let Some(end_time) = self.end_time {
            event.end_time = Some(end_time);
        }
        if let Some(all_day) = self.all_day {
            event.all_day = all_day;
        }
    }
}

/// Selection of events for bulk queries, updates and deletes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only instances of this parent
    pub parent_id: Option<Uuid>,
    /// Only events on exactly this date
    pub on_date: Option<NaiveDate>,
    /// Only events on or after this date
    pub from_date: Option<NaiveDate>,
}

impl EventFilter {
    pub fn instances_of(parent_id: Uuid) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.on_date = Some(date);
        self
    }

    pub fn starting(mut self, date: NaiveDate) -> Self {
        self.from_date = Some(date);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(parent_id) = self.parent_id {
            if event.parent_event_id() != Some(parent_id) {
                return false;
            }
        }
        if let Some(date) = self.on_date {
            if event.date != date {
                return false;
            }
        }
        if let Some(from) = self.from_date {
            if event.date < from {
                return false;
            }
        }
        true
    }
}
