//! Cadence library
//!
//! Recurring event expansion and admission control for calls to
//! rate-limited external providers.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod recurrence;
pub mod services;
pub mod store;
