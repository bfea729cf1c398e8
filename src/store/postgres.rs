//! PostgreSQL store adapters.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{EventStore, QuotaStore, StoreError, StoreResult};
use crate::config::DatabaseConfig;
use crate::models::{
    Event, EventFilter, EventLink, EventUpdate, NewEvent, RecurrenceEnd, RecurrencePattern,
    RecurrenceRule,
};
use crate::rate_limit::quota::{QuotaUsage, QuotaWindow};

const EVENT_COLUMNS: &str = "id, title, description, location, date, start_time, end_time, \
     all_day, recurrence_rule_id, parent_event_id, instance_date, created_at, updated_at";

const RULE_COLUMNS: &str = "id, frequency, \"interval\", by_day, by_month_day, by_month, by_set_pos, \
     end_type, end_count, end_date, exception_dates, created_at, updated_at";

// =============================================================================
// Connection
// =============================================================================

/// Event and quota stores sharing one connection pool
#[derive(Debug, Clone)]
pub struct PgStores {
    pub pool: PgPool,
    pub events: PgEventStore,
    pub quotas: PgQuotaStore,
}

impl PgStores {
    /// Opens the pool, brings the schema up to date and builds both stores.
    ///
    /// Every connection runs in UTC so quota boundaries and event timestamps
    /// round-trip unchanged.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        log::info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET timezone = 'UTC'").execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        log::info!(
            "Database pool ready (max: {}, min: {})",
            config.max_connections,
            config.min_connections
        );

        Self::migrate(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing, already migrated pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            events: PgEventStore::new(pool.clone()),
            quotas: PgQuotaStore::new(pool.clone()),
            pool,
        }
    }

    /// Applies the rule, event and quota migrations
    pub async fn migrate(pool: &PgPool) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(pool).await?;
        log::info!("Database migrations applied");
        Ok(())
    }

    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    location: Option<String>,
    date: NaiveDate,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    all_day: bool,
    recurrence_rule_id: Option<Uuid>,
    parent_event_id: Option<Uuid>,
    instance_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> StoreResult<Self> {
        let link = match (row.recurrence_rule_id, row.parent_event_id) {
            (None, None) => EventLink::Standalone,
            (Some(rule_id), None) => EventLink::Parent { rule_id },
            (None, Some(parent_id)) => EventLink::Instance {
                parent_id,
                instance_date: row.instance_date.unwrap_or(row.date),
            },
            (Some(_), Some(_)) => {
                return Err(StoreError::Corrupt(format!(
                    "event {} has both a rule and a parent",
                    row.id
                )))
            }
        };

        Ok(Event {
            id: row.id,
            title: row.title,
            description: row.description,
            location: row.location,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            all_day: row.all_day,
            link,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RuleRow {
    id: Uuid,
    frequency: String,
    interval: i32,
    by_day: Vec<String>,
    by_month_day: Vec<i32>,
    by_month: Vec<i32>,
    by_set_pos: Option<i32>,
    end_type: String,
    end_count: Option<i32>,
    end_date: Option<NaiveDate>,
    exception_dates: Vec<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(rule_id: Uuid, what: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("recurrence rule {}: {}", rule_id, what))
}

fn to_u32(rule_id: Uuid, field: &str, value: i32) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| corrupt(rule_id, format!("negative {}", field)))
}

impl TryFrom<RuleRow> for RecurrenceRule {
    type Error = StoreError;

    fn try_from(row: RuleRow) -> StoreResult<Self> {
        let id = row.id;
        let end = match (row.end_type.as_str(), row.end_count, row.end_date) {
            ("NEVER", _, _) => RecurrenceEnd::Never,
            ("COUNT", Some(count), _) => RecurrenceEnd::Count {
                end_count: to_u32(id, "end_count", count)?,
            },
            ("DATE", _, Some(end_date)) => RecurrenceEnd::Until { end_date },
            (other, _, _) => return Err(corrupt(id, format!("unusable end type {}", other))),
        };

        let pattern = RecurrencePattern {
            frequency: row.frequency.parse().map_err(|e| corrupt(id, e))?,
            interval: to_u32(id, "interval", row.interval)?,
            by_day: row
                .by_day
                .iter()
                .map(|d| d.parse())
                .collect::<Result<_, _>>()
                .map_err(|e| corrupt(id, e))?,
            by_month_day: row
                .by_month_day
                .into_iter()
                .map(|d| to_u32(id, "by_month_day", d))
                .collect::<StoreResult<_>>()?,
            by_month: row
                .by_month
                .into_iter()
                .map(|m| to_u32(id, "by_month", m))
                .collect::<StoreResult<_>>()?,
            by_set_pos: row.by_set_pos,
            end,
            exception_dates: row.exception_dates,
        };

        Ok(RecurrenceRule {
            id,
            pattern,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Column values of a pattern in table order
struct RuleColumns {
    frequency: &'static str,
    interval: i32,
    by_day: Vec<String>,
    by_month_day: Vec<i32>,
    by_month: Vec<i32>,
    by_set_pos: Option<i32>,
    end_type: &'static str,
    end_count: Option<i32>,
    end_date: Option<NaiveDate>,
    exception_dates: Vec<NaiveDate>,
}

fn to_i32(field: &str, value: u32) -> StoreResult<i32> {
    i32::try_from(value)
        .map_err(|_| StoreError::Backend(format!("{} {} does not fit the rule table", field, value)))
}

impl TryFrom<&RecurrencePattern> for RuleColumns {
    type Error = StoreError;

    fn try_from(pattern: &RecurrencePattern) -> StoreResult<Self> {
        let (end_type, end_count, end_date) = match pattern.end {
            RecurrenceEnd::Never => ("NEVER", None, None),
            RecurrenceEnd::Count { end_count } => {
                ("COUNT", Some(to_i32("end_count", end_count)?), None)
            }
            RecurrenceEnd::Until { end_date } => ("DATE", None, Some(end_date)),
        };

        Ok(Self {
            frequency: pattern.frequency.as_str(),
            interval: to_i32("interval", pattern.interval)?,
            by_day: pattern.by_day.iter().map(|d| d.as_str().to_string()).collect(),
            by_month_day: pattern.by_month_day.iter().map(|&d| d as i32).collect(),
            by_month: pattern.by_month.iter().map(|&m| m as i32).collect(),
            by_set_pos: pattern.by_set_pos,
            end_type,
            end_count,
            end_date,
            exception_dates: pattern.exception_dates.clone(),
        })
    }
}

// =============================================================================
// Event Store
// =============================================================================

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn create_event(&self, event: NewEvent) -> StoreResult<Event> {
        let (rule_id, parent_id, instance_date) = match event.link {
            EventLink::Standalone => (None, None, None),
            EventLink::Parent { rule_id } => (Some(rule_id), None, None),
            EventLink::Instance {
                parent_id,
                instance_date,
            } => (None, Some(parent_id), Some(instance_date)),
        };

        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            INSERT INTO events (id, title, description, location, date, start_time, end_time,
                                all_day, recurrence_rule_id, parent_event_id, instance_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.location)
        .bind(event.date)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.all_day)
        .bind(rule_id)
        .bind(parent_id)
        .bind(instance_date)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Event::try_from).transpose()
    }

    async fn update_event(&self, id: Uuid, update: &EventUpdate) -> StoreResult<Event> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            UPDATE events SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                location = COALESCE($4, location),
                date = COALESCE($5, date),
                start_time = COALESCE($6, start_time),
                end_time = COALESCE($7, end_time),
                all_day = COALESCE($8, all_day),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(id)
        .bind(&update.title)
        .bind(&update.description)
        .bind(&update.location)
        .bind(update.date)
        .bind(update.start_time)
        .bind(update.end_time)
        .bind(update.all_day)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "Event",
            id,
        })?;

        row.try_into()
    }

    async fn update_events(&self, filter: EventFilter, update: &EventUpdate) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE events SET
                title = COALESCE($4, title),
                description = COALESCE($5, description),
                location = COALESCE($6, location),
                date = COALESCE($7, date),
                start_time = COALESCE($8, start_time),
                end_time = COALESCE($9, end_time),
                all_day = COALESCE($10, all_day),
                updated_at = NOW()
            WHERE ($1::uuid IS NULL OR parent_event_id = $1)
              AND ($2::date IS NULL OR date = $2)
              AND ($3::date IS NULL OR date >= $3)
            "#,
        )
        .bind(filter.parent_id)
        .bind(filter.on_date)
        .bind(filter.from_date)
        .bind(&update.title)
        .bind(&update.description)
        .bind(&update.location)
        .bind(update.date)
        .bind(update.start_time)
        .bind(update.end_time)
        .bind(update.all_day)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_events(&self, filter: EventFilter) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM events
            WHERE ($1::uuid IS NULL OR parent_event_id = $1)
              AND ($2::date IS NULL OR date = $2)
              AND ($3::date IS NULL OR date >= $3)
            "#,
        )
        .bind(filter.parent_id)
        .bind(filter.on_date)
        .bind(filter.from_date)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn query_events(&self, filter: EventFilter) -> StoreResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {} FROM events
            WHERE ($1::uuid IS NULL OR parent_event_id = $1)
              AND ($2::date IS NULL OR date = $2)
              AND ($3::date IS NULL OR date >= $3)
            ORDER BY date ASC, created_at ASC
            "#,
            EVENT_COLUMNS
        ))
        .bind(filter.parent_id)
        .bind(filter.on_date)
        .bind(filter.from_date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn create_rule(&self, pattern: RecurrencePattern) -> StoreResult<RecurrenceRule> {
        let cols = RuleColumns::try_from(&pattern)?;

        let row = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            INSERT INTO recurrence_rules (id, frequency, "interval", by_day, by_month_day, by_month,
                                          by_set_pos, end_type, end_count, end_date, exception_dates)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            RULE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(cols.frequency)
        .bind(cols.interval)
        .bind(&cols.by_day)
        .bind(&cols.by_month_day)
        .bind(&cols.by_month)
        .bind(cols.by_set_pos)
        .bind(cols.end_type)
        .bind(cols.end_count)
        .bind(cols.end_date)
        .bind(&cols.exception_dates)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_rule(&self, id: Uuid) -> StoreResult<Option<RecurrenceRule>> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {} FROM recurrence_rules WHERE id = $1",
            RULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecurrenceRule::try_from).transpose()
    }

    async fn update_rule(
        &self,
        id: Uuid,
        pattern: RecurrencePattern,
    ) -> StoreResult<RecurrenceRule> {
        let cols = RuleColumns::try_from(&pattern)?;

        let row = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            UPDATE recurrence_rules SET
                frequency = $2,
                "interval" = $3,
                by_day = $4,
                by_month_day = $5,
                by_month = $6,
                by_set_pos = $7,
                end_type = $8,
                end_count = $9,
                end_date = $10,
                exception_dates = $11,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            RULE_COLUMNS
        ))
        .bind(id)
        .bind(cols.frequency)
        .bind(cols.interval)
        .bind(&cols.by_day)
        .bind(&cols.by_month_day)
        .bind(&cols.by_month)
        .bind(cols.by_set_pos)
        .bind(cols.end_type)
        .bind(cols.end_count)
        .bind(cols.end_date)
        .bind(&cols.exception_dates)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "RecurrenceRule",
            id,
        })?;

        row.try_into()
    }
}

// =============================================================================
// Quota Store
// =============================================================================

#[derive(Debug, FromRow)]
struct QuotaRow {
    provider: String,
    daily_used: i64,
    daily_limit: i64,
    daily_reset_at: DateTime<Utc>,
    monthly_used: i64,
    monthly_limit: i64,
    monthly_reset_at: DateTime<Utc>,
}

impl QuotaRow {
    fn into_entry(self) -> (String, QuotaUsage) {
        let window = |used: i64, limit: i64, reset_at| QuotaWindow {
            used: used.max(0) as u64,
            limit: limit.max(0) as u64,
            reset_at,
        };
        let usage = QuotaUsage {
            daily: window(self.daily_used, self.daily_limit, self.daily_reset_at),
            monthly: window(self.monthly_used, self.monthly_limit, self.monthly_reset_at),
        };
        (self.provider, usage)
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone)]
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn load_snapshot(&self) -> StoreResult<HashMap<String, QuotaUsage>> {
        let rows = sqlx::query_as::<_, QuotaRow>(
            r#"
            SELECT provider, daily_used, daily_limit, daily_reset_at,
                   monthly_used, monthly_limit, monthly_reset_at
            FROM provider_quota_usage
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(QuotaRow::into_entry).collect())
    }

    async fn save_snapshot(&self, snapshot: &HashMap<String, QuotaUsage>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for (provider, usage) in snapshot {
            sqlx::query(
                r#"
                INSERT INTO provider_quota_usage
                    (provider, daily_used, daily_limit, daily_reset_at,
                     monthly_used, monthly_limit, monthly_reset_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                ON CONFLICT (provider) DO UPDATE SET
                    daily_used = EXCLUDED.daily_used,
                    daily_limit = EXCLUDED.daily_limit,
                    daily_reset_at = EXCLUDED.daily_reset_at,
                    monthly_used = EXCLUDED.monthly_used,
                    monthly_limit = EXCLUDED.monthly_limit,
                    monthly_reset_at = EXCLUDED.monthly_reset_at,
                    updated_at = NOW()
                "#,
            )
            .bind(provider)
            .bind(to_i64(usage.daily.used))
            .bind(to_i64(usage.daily.limit))
            .bind(usage.daily.reset_at)
            .bind(to_i64(usage.monthly.used))
            .bind(to_i64(usage.monthly.limit))
            .bind(usage.monthly.reset_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
