//! Sync item data structures.
//!
//! A [`SyncItem`] is one pending change on its way to the remote service.
//! It is created by the enqueue API and afterwards only touched by the
//! engine: retry bookkeeping changes, nothing else does.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entity::EntityKind;
use crate::identity::OwnerId;

/// Current wall-clock time as epoch millis.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Drain priority. Orders `High < Normal < Low`, so sorting ascending drains
/// high-priority work first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// UUID v4 assigned at enqueue
    pub id: String,
    pub operation: Operation,
    pub entity_kind: EntityKind,
    /// Owner resolved from the payload; the serialization key
    pub owner_id: OwnerId,
    /// Sanitized record data (still contains the owner field)
    pub payload: Value,
    /// Enqueue timestamp (epoch millis)
    pub enqueued_at: i64,
    /// Failed transient attempts so far
    #[serde(default)]
    pub retry_count: u32,
    /// Earliest time of the next attempt (epoch millis); `None` = due now
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<i64>,
    /// Last transient failure, for diagnostics only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Local modification time used by last-write-wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<i64>,
    #[serde(default)]
    pub priority: Priority,
}

impl SyncItem {
    /// Create a new pending item with a fresh id, stamped now.
    pub fn new(
        operation: Operation,
        entity_kind: EntityKind,
        owner_id: OwnerId,
        payload: Value,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            entity_kind,
            owner_id,
            payload,
            enqueued_at: now_millis(),
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            device_id: None,
            last_modified_at: None,
            priority,
        }
    }

    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    #[must_use]
    pub fn with_last_modified_at(mut self, millis: i64) -> Self {
        self.last_modified_at = Some(millis);
        self
    }

    #[must_use]
    pub fn with_enqueued_at(mut self, millis: i64) -> Self {
        self.enqueued_at = millis;
        self
    }

    /// Timestamp used by the conflict policy.
    #[must_use]
    pub fn modified_at(&self) -> i64 {
        self.last_modified_at.unwrap_or(self.enqueued_at)
    }

    /// Queue ordering key: priority, then age, then id.
    pub(crate) fn order_key(&self) -> (Priority, i64, &str) {
        (self.priority, self.enqueued_at, self.id.as_str())
    }
}

/// An item that exhausted its retries or was permanently rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub item: SyncItem,
    pub failure_reason: String,
    /// Epoch millis
    pub dead_lettered_at: i64,
}

impl DeadLetterItem {
    pub fn new(item: SyncItem, failure_reason: impl Into<String>, dead_lettered_at: i64) -> Self {
        Self {
            item,
            failure_reason: failure_reason.into(),
            dead_lettered_at,
        }
    }

    /// Back to a fresh pending item: retry state reset, enqueue time refreshed.
    #[must_use]
    pub fn into_requeued(self, now: i64) -> SyncItem {
        SyncItem {
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            enqueued_at: now,
            ..self.item
        }
    }

    /// Whether the item is strictly older than `max_age_ms` at `now`.
    #[must_use]
    pub fn is_expired(&self, now: i64, max_age_ms: i64) -> bool {
        now.saturating_sub(self.dead_lettered_at) > max_age_ms
    }
}
