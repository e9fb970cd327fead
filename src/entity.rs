// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync-eligible record kinds and the whitelist check guarding the queue.
//!
//! # Example
//!
//! ```
//! use offline_sync::{EntityKind, EntityValidator};
//!
//! let validator = EntityValidator::default();
//! assert!(validator.validate("mood_entry"));
//! assert!(!validator.validate("chat_message"));
//! assert_eq!(validator.check("voice_checkin"), Some(EntityKind::VoiceCheckin));
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::{EventBus, SyncEvent};

/// Closed set of record kinds the engine will synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    UserProfile,
    MoodEntry,
    VoiceCheckin,
    DerivedProfile,
    TreatmentPlan,
    Achievement,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        Self::UserProfile,
        Self::MoodEntry,
        Self::VoiceCheckin,
        Self::DerivedProfile,
        Self::TreatmentPlan,
        Self::Achievement,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserProfile => "user_profile",
            Self::MoodEntry => "mood_entry",
            Self::VoiceCheckin => "voice_checkin",
            Self::DerivedProfile => "derived_profile",
            Self::TreatmentPlan => "treatment_plan",
            Self::Achievement => "achievement",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

/// Whitelist gate for incoming changes.
///
/// Every kind in [`EntityKind`] is enabled unless disabled through config.
/// The active set can change at runtime, which is why dispatch and dead
/// letter re-queue check it again.
#[derive(Clone)]
pub struct EntityValidator {
    enabled: Arc<RwLock<BTreeSet<EntityKind>>>,
    events: Option<EventBus>,
}

impl EntityValidator {
    /// Validator with every kind except `disabled` enabled.
    #[must_use]
    pub fn new(disabled: &[EntityKind]) -> Self {
        let enabled = EntityKind::ALL
            .iter()
            .copied()
            .filter(|k| !disabled.contains(k))
            .collect();
        Self {
            enabled: Arc::new(RwLock::new(enabled)),
            events: None,
        }
    }

    /// Emit `item_dropped_unsupported_entity` on rejections.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// True only if `raw` names an enabled kind.
    pub fn validate(&self, raw: &str) -> bool {
        self.check(raw).is_some()
    }

    /// Parse and whitelist-check a caller-supplied kind.
    pub fn check(&self, raw: &str) -> Option<EntityKind> {
        match raw.parse::<EntityKind>() {
            Ok(kind) if self.is_enabled(kind) => Some(kind),
            _ => {
                warn!(entity = %raw, "Dropping change for unsupported entity kind");
                if let Some(ref events) = self.events {
                    events.emit(SyncEvent::ItemDroppedUnsupportedEntity {
                        entity: raw.to_string(),
                    });
                }
                None
            }
        }
    }

    /// Whether an already-typed kind is still whitelisted.
    #[must_use]
    pub fn is_enabled(&self, kind: EntityKind) -> bool {
        self.enabled.read().contains(&kind)
    }

    /// Replace the disabled set (config reload).
    pub fn set_disabled(&self, disabled: &[EntityKind]) {
        let mut enabled = self.enabled.write();
        enabled.clear();
        enabled.extend(EntityKind::ALL.iter().copied().filter(|k| !disabled.contains(k)));
    }
}

impl Default for EntityValidator {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl fmt::Debug for EntityValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityValidator")
            .field("enabled", &*self.enabled.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_kinds_round_trip_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&EntityKind::VoiceCheckin).unwrap();
        assert_eq!(json, "\"voice_checkin\"");
        let back: EntityKind = serde_json::from_str("\"treatment_plan\"").unwrap();
        assert_eq!(back, EntityKind::TreatmentPlan);
    }

    #[test]
    fn test_rejects_unknown_and_case_variants() {
        let validator = EntityValidator::default();
        assert!(!validator.validate("chat_message"));
        assert!(!validator.validate("MOOD_ENTRY"));
        assert!(!validator.validate(""));
        assert!(validator.validate("achievement"));
    }

    #[test]
    fn test_rejection_emits_drop_event() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let validator = EntityValidator::default().with_events(events);

        assert!(validator.check("assessment").is_none());

        match rx.try_recv().unwrap() {
            SyncEvent::ItemDroppedUnsupportedEntity { entity } => assert_eq!(entity, "assessment"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_disabled_kinds_fail_validation() {
        let validator = EntityValidator::new(&[EntityKind::DerivedProfile]);
        assert!(!validator.validate("derived_profile"));
        assert!(!validator.is_enabled(EntityKind::DerivedProfile));
        assert!(validator.is_enabled(EntityKind::UserProfile));

        validator.set_disabled(&[]);
        assert!(validator.validate("derived_profile"));
    }

    #[test]
    fn test_clones_share_whitelist() {
        let validator = EntityValidator::default();
        let clone = validator.clone();
        validator.set_disabled(&[EntityKind::MoodEntry]);
        assert!(!clone.is_enabled(EntityKind::MoodEntry));
    }
}
