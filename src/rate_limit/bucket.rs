//! Token bucket.
//!
//! Tokens accrue continuously at `refill_rate` per second up to `capacity`
//! and each admission takes exactly one.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// New bucket starting full at `now`
    pub fn new(capacity: f64, refill_rate: f64, now: DateTime<Utc>) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
        }
    }

    /// Adds the tokens earned since the last refill, clamped to capacity
    pub fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = now - self.last_refill;
        if elapsed <= Duration::zero() {
            return;
        }
        // Microseconds overflow only after ~290k years, which refills to full anyway
        let elapsed_secs = elapsed
            .num_microseconds()
            .map_or(f64::INFINITY, |us| us as f64 / 1_000_000.0);
        self.tokens = (self.tokens + elapsed_secs * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes one token if available
    pub fn try_consume(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Returns a token taken for an admission that never reached its caller
    pub fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }

    /// Milliseconds needed to accumulate one token from empty
    pub fn retry_after_ms(&self) -> u64 {
        if self.refill_rate <= 0.0 {
            return u64::MAX;
        }
        (1000.0 / self.refill_rate).ceil() as u64
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn last_refill(&self) -> DateTime<Utc> {
        self.last_refill
    }
}
