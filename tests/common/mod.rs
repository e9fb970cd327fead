//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use offline_sync::{
    EntityKind, InMemoryStore, Operation, OwnerId, RemoteError, RemoteStore, SyncEngine, SyncEngineConfig,
    SyncEvent, UpsertRequest,
};

pub const U1: &str = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";
pub const U2: &str = "9b2d6a8e-1c3f-4e5a-8b7d-2f6e4c1a9d30";
pub const U3: &str = "c56a4180-65aa-42ec-a945-5fd21dec0538";

pub fn owner(raw: &str) -> OwnerId {
    OwnerId::parse(raw).unwrap()
}

/// How the fake remote answers for one owner.
#[derive(Debug, Clone)]
pub enum Behavior {
    Accept,
    AlwaysTransient,
    AlwaysPermanent,
    /// Fail transiently this many times, then accept
    FailTimes(u32),
    Conflict { remote_modified_at: i64 },
}

/// One observed remote call.
#[derive(Debug, Clone)]
pub struct Call {
    pub owner: OwnerId,
    pub entity: EntityKind,
    pub operation: Operation,
    pub idempotency_key: String,
    pub force: bool,
    pub started: Instant,
    pub finished: Instant,
}

/// Remote service fake: per-owner scripted behavior, call log with
/// timings, and a record table keyed by idempotency key.
pub struct ScriptedRemote {
    behaviors: Mutex<HashMap<OwnerId, Behavior>>,
    failures: Mutex<HashMap<OwnerId, u32>>,
    pub calls: Mutex<Vec<Call>>,
    pub records: Mutex<HashMap<String, Value>>,
    latency: Duration,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            records: Mutex::new(HashMap::new()),
            latency,
        })
    }

    pub fn set(&self, owner_id: &str, behavior: Behavior) {
        self.behaviors.lock().insert(owner(owner_id), behavior);
    }

    pub fn calls_for(&self, owner_id: &str) -> Vec<Call> {
        let owner = owner(owner_id);
        self.calls.lock().iter().filter(|c| c.owner == owner).cloned().collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn decide(&self, request: &UpsertRequest) -> Result<(), RemoteError> {
        let behavior = self
            .behaviors
            .lock()
            .get(&request.owner)
            .cloned()
            .unwrap_or(Behavior::Accept);
        match behavior {
            Behavior::Accept => Ok(()),
            Behavior::AlwaysTransient => Err(RemoteError::Transient("service unavailable".into())),
            Behavior::AlwaysPermanent => Err(RemoteError::Permanent("schema violation".into())),
            Behavior::FailTimes(n) => {
                let mut failures = self.failures.lock();
                let seen = failures.entry(request.owner.clone()).or_insert(0);
                if *seen < n {
                    *seen += 1;
                    Err(RemoteError::Transient("connection reset".into()))
                } else {
                    Ok(())
                }
            }
            Behavior::Conflict { remote_modified_at } if !request.force => {
                Err(RemoteError::Conflict { remote_modified_at })
            }
            Behavior::Conflict { .. } => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn upsert(&self, request: &UpsertRequest) -> Result<(), RemoteError> {
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = self.decide(request);
        if result.is_ok() {
            self.records
                .lock()
                .insert(request.idempotency_key.clone(), request.payload.clone());
        }
        self.calls.lock().push(Call {
            owner: request.owner.clone(),
            entity: request.entity,
            operation: request.operation,
            idempotency_key: request.idempotency_key.clone(),
            force: request.force,
            started,
            finished: Instant::now(),
        });
        result
    }
}

/// Collects every event emitted by an engine.
pub fn record_events(engine: &SyncEngine) -> Arc<Mutex<Vec<SyncEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.register_subscriber(Arc::new(move |event: &SyncEvent| sink.lock().push(event.clone())));
    events
}

pub fn count_events(events: &Mutex<Vec<SyncEvent>>, name: &str) -> usize {
    events.lock().iter().filter(|e| e.name() == name).count()
}

/// Started in-memory engine.
pub async fn engine_with(config: SyncEngineConfig, remote: Arc<ScriptedRemote>) -> Arc<SyncEngine> {
    let engine = Arc::new(SyncEngine::new(config, Arc::new(InMemoryStore::new()), remote));
    engine.start().await.unwrap();
    engine
}

pub async fn engine(remote: Arc<ScriptedRemote>) -> Arc<SyncEngine> {
    engine_with(SyncEngineConfig::default(), remote).await
}
