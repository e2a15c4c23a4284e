//! C6: per-issue stream queue (spec §4.3).
//!
//! Generalizes the teacher's `SessionLockMap` (`Semaphore(1)` per session
//! key, exclusive-turn-at-a-time) from "one exclusive permit per key" to
//! "one ordered, acknowledged stream per key" (SPEC_FULL §4.3): at-least-
//! once delivery, explicit ack, visibility-timeout requeue. Per-issue
//! mutual exclusion itself is NOT this crate's job — that's the Issue's
//! `claimed` CAS in `relay-stores`; this crate only promises ordered,
//! at-least-once delivery of message references.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use relay_domain::Result;

pub mod mem;

pub use mem::InMemoryQueue;

/// Wire shape (spec §6): `{issue_id, event_log_id, attempt, enqueued_at, trace_id?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueMessage {
    pub issue_id: i64,
    pub event_log_id: i64,
    pub attempt: u32,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedMessage {
    pub message_id: Uuid,
    pub issue_id: i64,
    pub event_log_id: i64,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub trace_id: Option<String>,
}

/// C6 (spec §4.3): ordered, at-least-once delivery of event references
/// keyed by issue. Infra-agnostic so a Redis/SQS-backed implementation
/// could satisfy it later without touching `relay-orchestrator`.
#[async_trait]
pub trait IssueQueue: Send + Sync {
    /// Enqueue for immediate delivery.
    async fn enqueue(&self, msg: NewQueueMessage) -> Result<()>;

    /// Enqueue, but not visible to `claim_next` until `delay` has
    /// elapsed — used by the Orchestrator's exponential-backoff retry
    /// path (spec §4.4).
    async fn enqueue_after(&self, msg: NewQueueMessage, delay: Duration) -> Result<()>;

    /// Claim the oldest currently-visible message for any consumer group
    /// member. Ordering across issues is unspecified (spec §4.3); within
    /// an issue, enqueue order is preserved. A message claimed but not
    /// acked within `visibility_timeout` becomes claimable again.
    async fn claim_next(
        &self,
        consumer_id: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<ClaimedMessage>>;

    /// Explicit ack by message id — only call after successful processing.
    async fn ack(&self, message_id: Uuid) -> Result<()>;

    /// Number of messages not yet acked (visible or in-flight); for tests
    /// and metrics.
    async fn pending_len(&self) -> usize;
}
