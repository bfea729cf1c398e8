//! Per-provider admission control.
//!
//! Each provider owns a token bucket, a quota and a priority queue behind its
//! own mutex, so operations on one provider are atomic with respect to each
//! other. Locks are never held across an await point.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use super::bucket::TokenBucket;
use super::queue::RequestQueue;
use super::quota::QuotaUsage;
use crate::clock::Clock;
use crate::config::{ProviderConfig, RateLimitConfig};
use crate::error::{AppError, AppResult};
use crate::models::{Denial, ProviderStatus, QueuedRequestInfo, RateLimitStatus, WarningLevel};
use crate::store::QuotaStore;

struct ProviderState {
    config: ProviderConfig,
    bucket: TokenBucket,
    quota: QuotaUsage,
    queue: RequestQueue,
    /// Highest level already alerted in the current reset window
    alerted: WarningLevel,
}

impl ProviderState {
    fn new(
        config: ProviderConfig,
        quota: Option<QuotaUsage>,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Self {
        let q = &config.quota;
        let quota = match quota {
            Some(saved) => saved.with_limits(q.daily_limit, q.monthly_limit),
            None => QuotaUsage::new(q.daily_limit, q.monthly_limit, now, offset),
        };
        let bucket = TokenBucket::new(
            config.rate_limit.burst_capacity as f64,
            config.rate_limit.refill_rate,
            now,
        );

        Self {
            config,
            bucket,
            quota,
            queue: RequestQueue::new(),
            alerted: WarningLevel::None,
        }
    }

    /// Brings the bucket and quota up to `now`
    fn refresh(&mut self, now: DateTime<Utc>, offset: FixedOffset) {
        if self.quota.refresh(now, offset).any() {
            self.alerted = WarningLevel::None;
        }
        self.bucket.refill(now);
    }

    fn warning_level(&self) -> WarningLevel {
        WarningLevel::from_ratio(
            self.quota.usage_ratio(),
            self.config.quota.warning_threshold,
            self.config.quota.alert_threshold,
        )
    }

    /// Logs the first crossing into each level per reset window
    fn alert_if_crossed(&mut self, provider: &str, level: WarningLevel) {
        if level <= self.alerted {
            return;
        }
        self.alerted = level;

        let daily = &self.quota.daily;
        let monthly = &self.quota.monthly;
        match level {
            WarningLevel::Warning => log::warn!(
                "Provider '{}' quota usage reached warning level (daily {}/{}, monthly {}/{})",
                provider,
                daily.used,
                daily.limit,
                monthly.used,
                monthly.limit
            ),
            WarningLevel::Critical => log::error!(
                "Provider '{}' quota usage is critical (daily {}/{}, monthly {}/{})",
                provider,
                daily.used,
                daily.limit,
                monthly.used,
                monthly.limit
            ),
            WarningLevel::None => {}
        }
    }

    /// One admission decision. Consumes a token and counts usage only when admitted.
    fn admit(&mut self, provider: &str, now: DateTime<Utc>, offset: FixedOffset) -> RateLimitStatus {
        self.refresh(now, offset);

        // Quota gate first, the bucket is left untouched
        if let Some((denial, reset_at)) = self.quota.exhausted() {
            self.alert_if_crossed(provider, WarningLevel::Critical);
            return RateLimitStatus {
                provider: provider.to_string(),
                allowed: false,
                tokens_remaining: self.bucket.tokens(),
                retry_after_ms: Some((reset_at - now).num_milliseconds().max(0) as u64),
                daily_remaining: self.quota.daily.remaining(),
                monthly_remaining: self.quota.monthly.remaining(),
                warning_level: WarningLevel::Critical,
                denial: Some(denial),
            };
        }

        if self.bucket.try_consume() {
            self.quota.record_admission();
            let level = self.warning_level();
            self.alert_if_crossed(provider, level);
            return RateLimitStatus {
                provider: provider.to_string(),
                allowed: true,
                tokens_remaining: self.bucket.tokens(),
                retry_after_ms: None,
                daily_remaining: self.quota.daily.remaining(),
                monthly_remaining: self.quota.monthly.remaining(),
                warning_level: level,
                denial: None,
            };
        }

        RateLimitStatus {
            provider: provider.to_string(),
            allowed: false,
            tokens_remaining: 0.0,
            retry_after_ms: Some(self.bucket.retry_after_ms()),
            daily_remaining: self.quota.daily.remaining(),
            monthly_remaining: self.quota.monthly.remaining(),
            warning_level: self.warning_level(),
            denial: Some(Denial::RateLimited),
        }
    }

    /// Gives back the token and quota of an admission nobody received
    fn refund(&mut self) {
        self.bucket.refund();
        self.quota.release_admission();
    }

    /// Hands an admission already charged by `admit` to the queue head.
    /// A head that stopped listening gets nothing and the charge is refunded.
    fn release_head(&mut self, provider: &str) -> bool {
        if let Some(request) = self.queue.pop_front() {
            let id = request.id;
            if request.dispatch() {
                return true;
            }
            log::debug!("Queued request {} for '{}' left before dispatch", id, provider);
        }
        self.refund();
        false
    }

    fn status(&self, provider: &str) -> ProviderStatus {
        ProviderStatus {
            provider: provider.to_string(),
            tokens: self.bucket.tokens(),
            capacity: self.bucket.capacity(),
            refill_rate: self.bucket.refill_rate(),
            daily_used: self.quota.daily.used,
            daily_limit: self.quota.daily.limit,
            daily_reset_at: self.quota.daily.reset_at,
            monthly_used: self.quota.monthly.used,
            monthly_limit: self.quota.monthly.limit,
            monthly_reset_at: self.quota.monthly.reset_at,
            queue_length: self.queue.len(),
            warning_level: self.warning_level(),
        }
    }
}

struct BackgroundTasks {
    refill: JoinHandle<()>,
    drain: JoinHandle<()>,
}

struct Inner {
    providers: HashMap<String, Mutex<ProviderState>>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn QuotaStore>,
    offset: FixedOffset,
    refill_tick: Duration,
    drain_tick: Duration,
    kick: Arc<Notify>,
    tasks: Mutex<Option<BackgroundTasks>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Token bucket and quota admission controller for outbound provider calls.
///
/// Cheap to clone; all clones share the same state. Construct one at
/// startup, hand it to callers, and `dispose` it on shutdown.
#[derive(Clone)]
pub struct RateLimitController {
    inner: Arc<Inner>,
}

impl RateLimitController {
    /// Builds the controller, restoring quota counters from `store` when possible
    pub async fn new(
        config: RateLimitConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn QuotaStore>,
    ) -> AppResult<Self> {
        config
            .validate()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        let mut saved = match store.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Failed to load quota snapshot, starting from zero: {}", e);
                HashMap::new()
            }
        };

        let now = clock.now();
        let offset = config.quota_offset();
        let providers = config
            .providers
            .iter()
            .map(|(name, provider)| {
                let state = ProviderState::new(provider.clone(), saved.remove(name), now, offset);
                (name.clone(), Mutex::new(state))
            })
            .collect();

        log::info!(
            "Rate limit controller ready for {} provider(s)",
            config.providers.len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                providers,
                clock,
                store,
                offset,
                refill_tick: config.refill_tick,
                drain_tick: config.drain_tick,
                kick: Arc::new(Notify::new()),
                tasks: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn provider(&self, provider: &str) -> AppResult<MutexGuard<'_, ProviderState>> {
        self.inner
            .providers
            .get(provider)
            .map(lock)
            .ok_or_else(|| AppError::Configuration(format!("Unknown provider '{}'", provider)))
    }

    /// Names of all configured providers, sorted
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Decides whether one request to `provider` may proceed now.
    ///
    /// Denials are not errors: they come back as `allowed == false` with a
    /// `retry_after_ms` hint. Only an unknown provider is an error.
    pub async fn check_rate_limit(&self, provider: &str) -> AppResult<RateLimitStatus> {
        let now = self.inner.clock.now();
        let status = self.provider(provider)?.admit(provider, now, self.inner.offset);

        if status.allowed {
            self.save_snapshot().await;
        } else {
            log::debug!(
                "Request to '{}' denied ({:?}), retry in {:?}ms",
                provider,
                status.denial,
                status.retry_after_ms
            );
        }
        Ok(status)
    }

    /// Current quota counters of `provider`, resetting elapsed windows first
    pub fn get_quota_usage(&self, provider: &str) -> AppResult<QuotaUsage> {
        let now = self.inner.clock.now();
        let mut state = self.provider(provider)?;
        state.refresh(now, self.inner.offset);
        Ok(state.quota.clone())
    }

    /// Read-only snapshot of every provider; refills but never consumes
    pub fn get_all_rate_limit_status(&self) -> Vec<ProviderStatus> {
        let now = self.inner.clock.now();
        let mut statuses: Vec<ProviderStatus> = self
            .inner
            .providers
            .iter()
            .map(|(name, state)| {
                let mut state = lock(state);
                state.refresh(now, self.inner.offset);
                state.status(name)
            })
            .collect();
        statuses.sort_by(|a, b| a.provider.cmp(&b.provider));
        statuses
    }

    /// Queued requests of `provider` in service order
    pub fn queue_snapshot(&self, provider: &str) -> AppResult<Vec<QueuedRequestInfo>> {
        Ok(self.provider(provider)?.queue.snapshot())
    }

    /// Places a caller in the provider queue and returns its waiting handle.
    ///
    /// A zero or absent `timeout` waits without bound.
    pub fn enqueue(
        &self,
        provider: &str,
        priority: i32,
        timeout: Option<Duration>,
    ) -> AppResult<Admission> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AppError::Shutdown);
        }

        let timeout = timeout.filter(|t| !t.is_zero());
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.provider(provider)?;
            let now = self.inner.clock.now();
            state.queue.push(id, provider, priority, now, timeout, tx);
            log::debug!(
                "Queued request {} for '{}' (priority {}, {} waiting)",
                id,
                provider,
                priority,
                state.queue.len()
            );
        }
        self.inner.kick.notify_one();

        Ok(Admission {
            id,
            provider: provider.to_string(),
            timeout,
            rx,
            controller: self.clone(),
        })
    }

    /// Waits for admission through the provider queue, then runs `request_fn`.
    ///
    /// Fails with `QueueTimeout` when not admitted within `timeout`, and with
    /// `QueueCleared` or `Shutdown` when the queue is emptied first.
    pub async fn queue_request<F, Fut, T>(
        &self,
        provider: &str,
        request_fn: F,
        priority: i32,
        timeout: Option<Duration>,
    ) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.start();
        self.enqueue(provider, priority, timeout)?.wait().await?;
        request_fn().await
    }

    /// Removes a still-queued request; false when it was already dispatched
    fn withdraw(&self, provider: &str, id: Uuid) -> bool {
        match self.inner.providers.get(provider) {
            Some(state) => lock(state).queue.remove(id).is_some(),
            None => false,
        }
    }

    /// One drain pass over every queue: admits and releases heads while
    /// capacity allows. Returns how many callers were released.
    pub async fn process_queues(&self) -> usize {
        let now = self.inner.clock.now();
        let mut released = 0;

        for (name, state) in &self.inner.providers {
            let mut state = lock(state);
            loop {
                state.queue.discard_abandoned();
                if state.queue.is_empty() {
                    break;
                }
                if !state.admit(name, now, self.inner.offset).allowed {
                    break;
                }
                if state.release_head(name) {
                    released += 1;
                }
            }
        }

        if released > 0 {
            self.save_snapshot().await;
        }
        released
    }

    /// Rejects every request queued for `provider`, returning how many there were
    pub fn clear_queue(&self, provider: &str) -> AppResult<usize> {
        let requests = self.provider(provider)?.queue.take_all();
        let count = requests.len();
        for request in requests {
            request.reject(AppError::QueueCleared {
                provider: provider.to_string(),
            });
        }
        if count > 0 {
            log::info!("Cleared {} queued request(s) for '{}'", count, provider);
        }
        Ok(count)
    }

    /// Starts the refill and drain loops. Calling it again is a no-op.
    pub fn start(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut tasks = lock(&self.inner.tasks);
        if tasks.is_some() {
            return;
        }

        let refill = tokio::spawn(refill_loop(
            Arc::downgrade(&self.inner),
            self.inner.refill_tick,
        ));
        let drain = tokio::spawn(drain_loop(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.kick),
            self.inner.drain_tick,
        ));
        *tasks = Some(BackgroundTasks { refill, drain });

        log::info!("Rate limit background tasks started");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.tasks).is_some()
    }

    /// Stops the background loops, rejects everything still queued and
    /// persists the final quota counters. Later enqueues fail with `Shutdown`.
    pub async fn dispose(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(tasks) = lock(&self.inner.tasks).take() {
            tasks.refill.abort();
            tasks.drain.abort();
        }

        let mut rejected = 0;
        for state in self.inner.providers.values() {
            let requests = lock(state).queue.take_all();
            rejected += requests.len();
            for request in requests {
                request.reject(AppError::Shutdown);
            }
        }

        self.save_snapshot().await;
        log::info!(
            "Rate limit controller disposed ({} queued request(s) rejected)",
            rejected
        );
    }

    /// Persists quota counters; failures are logged and otherwise ignored
    async fn save_snapshot(&self) {
        let snapshot: HashMap<String, QuotaUsage> = self
            .inner
            .providers
            .iter()
            .map(|(name, state)| (name.clone(), lock(state).quota.clone()))
            .collect();

        if let Err(e) = self.inner.store.save_snapshot(&snapshot).await {
            log::warn!("Failed to persist quota snapshot: {}", e);
        }
    }

    /// Refills every bucket; returns true when some queue is waiting
    fn refill_all(&self) -> bool {
        let now = self.inner.clock.now();
        let mut waiting = false;
        for state in self.inner.providers.values() {
            let mut state = lock(state);
            state.refresh(now, self.inner.offset);
            waiting |= !state.queue.is_empty();
        }
        waiting
    }
}

async fn refill_loop(weak: Weak<Inner>, tick: Duration) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        let controller = RateLimitController { inner };
        if controller.refill_all() {
            controller.inner.kick.notify_one();
        }
    }
}

async fn drain_loop(weak: Weak<Inner>, kick: Arc<Notify>, tick: Duration) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = kick.notified() => {}
        }
        let Some(inner) = weak.upgrade() else { break };
        RateLimitController { inner }.process_queues().await;
    }
}

/// Handle of a queued caller
pub struct Admission {
    id: Uuid,
    provider: String,
    timeout: Option<Duration>,
    rx: oneshot::Receiver<AppResult<()>>,
    controller: RateLimitController,
}

impl Admission {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolves once the request is admitted, cleared, timed out or shut down
    pub async fn wait(self) -> AppResult<()> {
        let Admission {
            id,
            provider,
            timeout,
            mut rx,
            controller,
        } = self;

        let received = match timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(received) => received,
                Err(_) => {
                    if controller.withdraw(&provider, id) {
                        log::debug!("Queued request {} for '{}' timed out", id, provider);
                        return Err(AppError::QueueTimeout {
                            provider,
                            timeout_ms: limit.as_millis() as u64,
                        });
                    }
                    // Dispatched while the timer fired
                    rx.await
                }
            },
        };

        received.map_err(|_| {
            AppError::Internal(format!("Queued request {} was dropped unanswered", id))
        })?
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("timeout", &self.timeout)
            .finish()
    }
}
