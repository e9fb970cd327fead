// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the sync engine.
//!
//! | Class | Where it surfaces | Retried? |
//! |---|---|---|
//! | [`ValidationError`] | `enqueue` (telemetry only) | never |
//! | [`DispatchError::Transient`] / [`DispatchError::Timeout`] | batch cycle | with backoff |
//! | [`DispatchError::Permanent`] / [`DispatchError::Unroutable`] | batch cycle | dead-lettered at once |
//! | [`StorageError::Corrupted`] | queue/DLQ load | dropped and logged |

use thiserror::Error;

use crate::backpressure::BackpressureLevel;
use crate::entity::EntityKind;

pub use crate::storage::traits::StorageError;

/// Permanent rejection of a change before it reaches the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported entity kind '{0}'")]
    UnsupportedEntity(String),
    #[error("payload has no owner identifier")]
    MissingOwner,
    #[error("owner identifier is not a valid UUID")]
    MalformedOwner,
    #[error("owner identifier is a sentinel value")]
    SentinelOwner,
    #[error("payload must be a JSON object")]
    PayloadNotObject,
}

impl ValidationError {
    /// Short label for metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedEntity(_) => "unsupported_entity",
            Self::MissingOwner => "missing_owner",
            Self::MalformedOwner => "malformed_owner",
            Self::SentinelOwner => "sentinel_owner",
            Self::PayloadNotObject => "payload_not_object",
        }
    }
}

/// Why an `enqueue` call did not produce a queued item.
#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("sync queue under backpressure ({level}), capacity {capacity}")]
    Backpressure {
        level: BackpressureLevel,
        capacity: usize,
    },
    #[error("queue storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("sync engine is not accepting changes")]
    NotRunning,
}

impl EnqueueError {
    /// True when the caller may try again later (the write itself was fine).
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }
}

/// Outcome of a failed remote dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("transient remote failure: {0}")]
    Transient(String),
    #[error("remote call timed out after {0} ms")]
    Timeout(u64),
    #[error("remote rejected record: {0}")]
    Permanent(String),
    #[error("no route for entity kind {0}")]
    Unroutable(EntityKind),
}

impl DispatchError {
    /// Transient failures consume a retry slot; everything else is terminal.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Short label used for metrics and events.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Timeout(_) => "timeout",
            Self::Permanent(_) => "permanent",
            Self::Unroutable(_) => "unroutable",
        }
    }
}

/// Errors from the dead letter store.
#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("dead letter item '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("dead letter storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl From<DeadLetterError> for EnqueueError {
    fn from(err: DeadLetterError) -> Self {
        match err {
            DeadLetterError::NotFound(id) => {
                EnqueueError::Storage(StorageError::NotFound(id))
            }
            DeadLetterError::Validation(e) => EnqueueError::Validation(e),
            DeadLetterError::Storage(e) => EnqueueError::Storage(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_classes() {
        assert!(DispatchError::Transient("net".into()).is_transient());
        assert!(DispatchError::Timeout(500).is_transient());
        assert!(!DispatchError::Permanent("schema".into()).is_transient());
        assert!(!DispatchError::Unroutable(EntityKind::MoodEntry).is_transient());

        assert_eq!(DispatchError::Timeout(1).class(), "timeout");
        assert_eq!(DispatchError::Unroutable(EntityKind::Achievement).class(), "unroutable");
    }

    #[test]
    fn test_validation_converts_into_enqueue_error() {
        let err: EnqueueError = ValidationError::SentinelOwner.into();
        assert!(matches!(err, EnqueueError::Validation(ValidationError::SentinelOwner)));
        assert!(!err.is_backpressure());
    }

    #[test]
    fn test_validation_reasons_are_distinct() {
        let reasons: std::collections::HashSet<_> = [
            ValidationError::UnsupportedEntity("chat".into()),
            ValidationError::MissingOwner,
            ValidationError::MalformedOwner,
            ValidationError::SentinelOwner,
            ValidationError::PayloadNotObject,
        ]
        .iter()
        .map(ValidationError::reason)
        .collect();
        assert_eq!(reasons.len(), 5);
        assert!(reasons.contains("sentinel_owner"));
    }

    #[test]
    fn test_backpressure_message() {
        let err = EnqueueError::Backpressure {
            level: BackpressureLevel::Full,
            capacity: 10,
        };
        assert!(err.is_backpressure());
        assert!(err.to_string().contains("Full"));
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn test_dead_letter_not_found_maps_to_storage() {
        let err: EnqueueError = DeadLetterError::NotFound("x".into()).into();
        assert!(matches!(err, EnqueueError::Storage(StorageError::NotFound(ref id)) if id == "x"));
    }
}
