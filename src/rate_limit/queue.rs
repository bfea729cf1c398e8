//! Priority queue of deferred callers.
//!
//! Entries are kept sorted by priority (highest first), then enqueue time,
//! then arrival sequence, so equal priorities are served FIFO.

use std::cmp::Reverse;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::QueuedRequestInfo;

/// Channel through which a waiting caller learns its fate
pub type Responder = oneshot::Sender<AppResult<()>>;

pub struct QueuedRequest {
    pub id: Uuid,
    pub provider: String,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub timeout: Option<Duration>,
    seq: u64,
    responder: Responder,
}

impl QueuedRequest {
    fn key(&self) -> (Reverse<i32>, DateTime<Utc>, u64) {
        (Reverse(self.priority), self.enqueued_at, self.seq)
    }

    pub fn info(&self) -> QueuedRequestInfo {
        QueuedRequestInfo {
            id: self.id,
            provider: self.provider.clone(),
            priority: self.priority,
            enqueued_at: self.enqueued_at,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
        }
    }

    /// The caller stopped waiting (its future was dropped)
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }

    /// Releases the caller; false if nobody was listening
    pub fn dispatch(self) -> bool {
        self.responder.send(Ok(())).is_ok()
    }

    pub fn reject(self, error: AppError) {
        // A caller that already gave up has nothing to receive
        let _ = self.responder.send(Err(error));
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: Vec<QueuedRequest>,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a request at its priority position
    pub fn push(
        &mut self,
        id: Uuid,
        provider: &str,
        priority: i32,
        enqueued_at: DateTime<Utc>,
        timeout: Option<Duration>,
        responder: Responder,
    ) {
        let request = QueuedRequest {
            id,
            provider: provider.to_string(),
            priority,
            enqueued_at,
            timeout,
            seq: self.next_seq,
            responder,
        };
        self.next_seq += 1;

        let key = request.key();
        let position = self.entries.partition_point(|e| e.key() <= key);
        self.entries.insert(position, request);
    }

    pub fn front(&self) -> Option<&QueuedRequest> {
        self.entries.first()
    }

    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn remove(&mut self, id: Uuid) -> Option<QueuedRequest> {
        let position = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(position))
    }

    /// Drops entries whose callers are gone, returning how many
    pub fn discard_abandoned(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_abandoned());
        before - self.entries.len()
    }

    /// Empties the queue, handing back every entry in service order
    pub fn take_all(&mut self) -> Vec<QueuedRequest> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueuedRequestInfo> {
        self.entries.iter().map(QueuedRequest::info).collect()
    }
}
