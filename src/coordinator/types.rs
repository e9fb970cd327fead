//! Public types for the sync engine coordinator.

use serde_json::Value;

use crate::backpressure::BackpressureLevel;
use crate::sync_item::{Operation, Priority};

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, nothing loaded yet
    Created,
    /// Restoring the queue and dead letters from the durable store
    Loading,
    /// Accepting changes; cycles run on demand
    Ready,
    /// Background loop running
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Shut down; no further changes accepted
    Stopped,
}

impl EngineState {
    /// Whether `enqueue` is accepted in this state.
    #[must_use]
    pub fn accepts_changes(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Loading => write!(f, "Loading"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Snapshot for a "pending sync" indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: EngineState,
    /// Items waiting in the queue
    pub pending: usize,
    /// Items in the dead letter store
    pub dead_lettered: usize,
    pub pressure: BackpressureLevel,
}

impl SyncStatus {
    /// True when nothing is waiting and nothing is stuck.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.dead_lettered == 0
    }
}

/// A local change handed to [`super::SyncEngine::enqueue_with`].
///
/// `entity` is the caller's raw kind string; it is checked against the
/// whitelist before anything else happens.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    pub operation: Operation,
    pub entity: String,
    pub payload: Value,
    pub priority: Priority,
    pub device_id: Option<String>,
    /// Local modification time (epoch millis) for last-write-wins
    pub last_modified_at: Option<i64>,
}

impl ChangeRequest {
    pub fn new(operation: Operation, entity: impl Into<String>, payload: Value) -> Self {
        Self {
            operation,
            entity: entity.into(),
            payload,
            priority: Priority::default(),
            device_id: None,
            last_modified_at: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(format!("{}", EngineState::Created), "Created");
        assert_eq!(format!("{}", EngineState::Running), "Running");
        assert_eq!(format!("{}", EngineState::Stopped), "Stopped");
    }

    #[test]
    fn test_accepts_changes() {
        assert!(!EngineState::Created.accepts_changes());
        assert!(!EngineState::Loading.accepts_changes());
        assert!(EngineState::Ready.accepts_changes());
        assert!(EngineState::Running.accepts_changes());
        assert!(!EngineState::ShuttingDown.accepts_changes());
        assert!(!EngineState::Stopped.accepts_changes());
    }

    #[test]
    fn test_change_request_builder() {
        let req = ChangeRequest::new(Operation::Update, "user_profile", json!({}))
            .with_priority(Priority::High)
            .with_device_id("tablet")
            .with_last_modified_at(77);
        assert_eq!(req.entity, "user_profile");
        assert_eq!(req.priority, Priority::High);
        assert_eq!(req.device_id.as_deref(), Some("tablet"));
        assert_eq!(req.last_modified_at, Some(77));
    }

    #[test]
    fn test_status_settled() {
        let status = SyncStatus {
            state: EngineState::Running,
            pending: 0,
            dead_lettered: 0,
            pressure: BackpressureLevel::Normal,
        };
        assert!(status.is_settled());
        assert!(!SyncStatus { pending: 1, ..status }.is_settled());
    }
}
