// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Routes a queued change to its remote collection.
//!
//! The [`RemoteStore`] is the only seam to the network. Every request is an
//! owner-scoped upsert carrying an idempotency key, so a retry after an
//! ambiguous failure (timeout, dropped connection) can never duplicate the
//! record remotely.
//!
//! Conflicts resolve last-write-wins on the local modification time: when the
//! remote copy is older the change is resent once with `force`, when it is
//! newer the local change is superseded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::entity::{EntityKind, EntityValidator};
use crate::error::DispatchError;
use crate::identity::OwnerId;
use crate::sync_item::{Operation, SyncItem};

/// Failure reported by the remote service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network, 5xx, rate limit: worth retrying.
    #[error("transient: {0}")]
    Transient(String),
    /// Schema or auth rejection: retrying will not help.
    #[error("permanent: {0}")]
    Permanent(String),
    /// The remote holds a copy modified at `remote_modified_at`.
    #[error("conflict with remote copy modified at {remote_modified_at}")]
    Conflict { remote_modified_at: i64 },
}

/// One owner-scoped idempotent upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertRequest {
    pub owner: OwnerId,
    pub entity: EntityKind,
    pub collection: &'static str,
    pub operation: Operation,
    pub payload: Value,
    pub idempotency_key: String,
    pub last_modified_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Overwrite a conflicting remote copy
    pub force: bool,
}

/// The remote data service.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert(&self, request: &UpsertRequest) -> Result<(), RemoteError>;
}

/// Successful dispatch outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The remote accepted the change.
    Synced,
    /// A newer remote copy won; the local change is obsolete.
    Superseded { remote_modified_at: i64 },
}

/// Remote collection for a kind. Exhaustive: a new kind does not compile
/// until it has a route.
#[must_use]
pub fn collection_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::UserProfile => "user_profiles",
        EntityKind::MoodEntry => "mood_entries",
        EntityKind::VoiceCheckin => "voice_checkins",
        EntityKind::DerivedProfile => "derived_profiles",
        EntityKind::TreatmentPlan => "treatment_plans",
        EntityKind::Achievement => "achievements",
    }
}

/// Upsert key for the remote record an item writes.
///
/// Derived from `(kind, owner, payload identity)` where the identity is the
/// payload's `id` field, or the whole canonical payload when it has none.
/// Retries, re-queues and re-enqueues of the same record all map to the
/// same key, so the remote never ends up with two copies.
#[must_use]
pub fn idempotency_key(item: &SyncItem) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item.entity_kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(item.owner_id.as_str().as_bytes());
    hasher.update(b"|");
    match item.payload.get("id") {
        Some(Value::String(id)) => hasher.update(id.as_bytes()),
        Some(Value::Number(id)) => hasher.update(id.to_string().as_bytes()),
        // serde_json maps are key-sorted, so this is canonical
        _ => hasher.update(item.payload.to_string().as_bytes()),
    }
    hex::encode(hasher.finalize())
}

pub struct EntityDispatcher {
    remote: Arc<dyn RemoteStore>,
    validator: EntityValidator,
    timeout_ms: AtomicU64,
}

impl EntityDispatcher {
    pub fn new(remote: Arc<dyn RemoteStore>, validator: EntityValidator, timeout: Duration) -> Self {
        Self {
            remote,
            validator,
            timeout_ms: AtomicU64::new(duration_ms(timeout)),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Acquire))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(duration_ms(timeout), Ordering::Release);
    }

    /// Build the upsert for `item`.
    #[must_use]
    pub fn build_request(item: &SyncItem, force: bool) -> UpsertRequest {
        UpsertRequest {
            owner: item.owner_id.clone(),
            entity: item.entity_kind,
            collection: collection_for(item.entity_kind),
            operation: item.operation,
            payload: item.payload.clone(),
            idempotency_key: idempotency_key(item),
            last_modified_at: item.modified_at(),
            device_id: item.device_id.clone(),
            force,
        }
    }

    /// Send one item to the remote.
    pub async fn dispatch(&self, item: &SyncItem) -> Result<DispatchOutcome, DispatchError> {
        if !self.validator.is_enabled(item.entity_kind) {
            return Err(DispatchError::Unroutable(item.entity_kind));
        }

        let _timer = crate::metrics::LatencyTimer::new(item.entity_kind);
        let request = Self::build_request(item, false);
        match self.send(&request).await {
            Ok(()) => Ok(DispatchOutcome::Synced),
            Err(SendError::Remote(RemoteError::Conflict { remote_modified_at })) => {
                self.resolve_conflict(item, request, remote_modified_at).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_conflict(
        &self,
        item: &SyncItem,
        mut request: UpsertRequest,
        remote_modified_at: i64,
    ) -> Result<DispatchOutcome, DispatchError> {
        let local = item.modified_at();
        if local < remote_modified_at {
            info!(
                item_id = %item.id,
                entity = %item.entity_kind,
                local_modified_at = local,
                remote_modified_at,
                "Remote copy is newer, dropping local change"
            );
            return Ok(DispatchOutcome::Superseded { remote_modified_at });
        }

        debug!(item_id = %item.id, local, remote_modified_at, "Local change is newer, forcing write");
        request.force = true;
        match self.send(&request).await {
            Ok(()) => Ok(DispatchOutcome::Synced),
            Err(SendError::Remote(RemoteError::Conflict { remote_modified_at })) => {
                Err(DispatchError::Transient(format!(
                    "conflict persisted after forced write (remote modified at {})",
                    remote_modified_at
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn send(&self, request: &UpsertRequest) -> Result<(), SendError> {
        let timeout = self.timeout();
        match tokio::time::timeout(timeout, self.remote.upsert(request)).await {
            Ok(result) => result.map_err(SendError::Remote),
            Err(_) => Err(SendError::TimedOut(duration_ms(timeout))),
        }
    }
}

enum SendError {
    Remote(RemoteError),
    TimedOut(u64),
}

impl From<SendError> for DispatchError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::TimedOut(ms) => DispatchError::Timeout(ms),
            SendError::Remote(RemoteError::Transient(msg)) => DispatchError::Transient(msg),
            SendError::Remote(RemoteError::Permanent(msg)) => DispatchError::Permanent(msg),
            SendError::Remote(RemoteError::Conflict { remote_modified_at }) => DispatchError::Transient(
                format!("unresolved conflict (remote modified at {})", remote_modified_at),
            ),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_item::Priority;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Replays scripted responses and records every request.
    #[derive(Default)]
    struct ScriptedRemote {
        responses: Mutex<VecDeque<Result<(), RemoteError>>>,
        requests: Mutex<Vec<UpsertRequest>>,
        delay: Option<Duration>,
    }

    impl ScriptedRemote {
        fn new(responses: Vec<Result<(), RemoteError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl RemoteStore for ScriptedRemote {
        async fn upsert(&self, request: &UpsertRequest) -> Result<(), RemoteError> {
            self.requests.lock().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn item(kind: EntityKind) -> SyncItem {
        SyncItem::new(
            Operation::Update,
            kind,
            OwnerId::parse("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap(),
            json!({"id": "rec-1", "user_id": "3f2504e0-4f89-11d3-9a0c-0305e82c3301"}),
            Priority::Normal,
        )
        .with_last_modified_at(1_000)
    }

    fn dispatcher(remote: Arc<ScriptedRemote>) -> EntityDispatcher {
        EntityDispatcher::new(remote, EntityValidator::default(), Duration::from_secs(5))
    }

    #[test]
    fn test_every_kind_has_a_distinct_collection() {
        let mut seen: Vec<_> = EntityKind::ALL.iter().map(|k| collection_for(*k)).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), EntityKind::ALL.len());
        assert_eq!(collection_for(EntityKind::MoodEntry), "mood_entries");
    }

    #[test]
    fn test_idempotency_key_follows_record_identity() {
        let a = item(EntityKind::MoodEntry);
        let mut retried = a.clone();
        retried.retry_count = 3;
        assert_eq!(idempotency_key(&a), idempotency_key(&retried));
        assert_eq!(idempotency_key(&a).len(), 64);

        // Same record enqueued again as a new item
        let again = item(EntityKind::MoodEntry);
        assert_ne!(a.id, again.id);
        assert_eq!(idempotency_key(&a), idempotency_key(&again));

        let mut other = item(EntityKind::MoodEntry);
        other.payload = json!({"id": "rec-2"});
        assert_ne!(idempotency_key(&a), idempotency_key(&other));
        assert_ne!(idempotency_key(&a), idempotency_key(&item(EntityKind::Achievement)));
    }

    #[test]
    fn test_idempotency_key_without_id_uses_payload() {
        let mut a = item(EntityKind::MoodEntry);
        a.payload = json!({"mood": 3, "note": "ok"});
        let mut b = item(EntityKind::MoodEntry);
        b.payload = json!({"note": "ok", "mood": 3});
        assert_eq!(idempotency_key(&a), idempotency_key(&b));

        b.payload = json!({"mood": 4});
        assert_ne!(idempotency_key(&a), idempotency_key(&b));
    }

    #[tokio::test]
    async fn test_success_routes_to_collection() {
        let remote = ScriptedRemote::new(vec![Ok(())]);
        let it = item(EntityKind::TreatmentPlan);

        let outcome = dispatcher(remote.clone()).dispatch(&it).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Synced);
        let requests = remote.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].collection, "treatment_plans");
        assert_eq!(requests[0].owner, it.owner_id);
        assert_eq!(requests[0].last_modified_at, 1_000);
        assert!(!requests[0].force);
    }

    #[tokio::test]
    async fn test_errors_are_classified() {
        let remote = ScriptedRemote::new(vec![
            Err(RemoteError::Transient("503".into())),
            Err(RemoteError::Permanent("schema".into())),
        ]);
        let d = dispatcher(remote);
        let it = item(EntityKind::MoodEntry);

        assert_eq!(d.dispatch(&it).await, Err(DispatchError::Transient("503".into())));
        assert_eq!(d.dispatch(&it).await, Err(DispatchError::Permanent("schema".into())));
    }

    #[tokio::test]
    async fn test_disabled_kind_is_unroutable() {
        let remote = ScriptedRemote::new(vec![]);
        let validator = EntityValidator::new(&[EntityKind::DerivedProfile]);
        let d = EntityDispatcher::new(remote.clone(), validator, Duration::from_secs(1));

        let err = d.dispatch(&item(EntityKind::DerivedProfile)).await.unwrap_err();
        assert_eq!(err, DispatchError::Unroutable(EntityKind::DerivedProfile));
        assert!(remote.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_newer_local_change_forces_write() {
        let remote = ScriptedRemote::new(vec![Err(RemoteError::Conflict { remote_modified_at: 500 }), Ok(())]);

        let outcome = dispatcher(remote.clone()).dispatch(&item(EntityKind::UserProfile)).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Synced);
        let requests = remote.requests.lock();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].force);
        assert_eq!(requests[0].idempotency_key, requests[1].idempotency_key);
    }

    #[tokio::test]
    async fn test_newer_remote_copy_supersedes() {
        let remote = ScriptedRemote::new(vec![Err(RemoteError::Conflict { remote_modified_at: 2_000 })]);

        let outcome = dispatcher(remote.clone()).dispatch(&item(EntityKind::UserProfile)).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Superseded { remote_modified_at: 2_000 });
        assert_eq!(remote.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_conflict_is_transient() {
        let remote = ScriptedRemote::new(vec![
            Err(RemoteError::Conflict { remote_modified_at: 500 }),
            Err(RemoteError::Conflict { remote_modified_at: 900 }),
        ]);
        let err = dispatcher(remote).dispatch(&item(EntityKind::UserProfile)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_remote_times_out() {
        let remote = Arc::new(ScriptedRemote {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let d = EntityDispatcher::new(remote, EntityValidator::default(), Duration::from_millis(250));

        let err = d.dispatch(&item(EntityKind::Achievement)).await.unwrap_err();
        assert_eq!(err, DispatchError::Timeout(250));
        assert!(err.is_transient());
    }
}
