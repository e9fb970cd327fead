// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic offline-sync usage example.
//!
//! Demonstrates:
//! 1. Opening the engine over a SQLite queue file
//! 2. Enqueueing changes for two users while "offline"
//! 3. Retries with backoff against a flaky remote
//! 4. A dead letter and its manual re-queue
//! 5. Cache invalidation on successful sync
//! 6. Displaying metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use parking_lot::Mutex;
use serde_json::json;

use offline_sync::{
    EngineState, EntityKind, Operation, OwnerId, Priority, RemoteError, RemoteStore, SyncEngine, SyncEngineConfig,
    UpsertRequest,
};

const ALICE: &str = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";
const BOB: &str = "9b2d6a8e-1c3f-4e5a-8b7d-2f6e4c1a9d30";

/// Remote that is offline until told otherwise, and rejects achievements
/// until its schema is migrated.
struct FlakyBackend {
    online: AtomicBool,
    migrated: AtomicBool,
    attempts: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl RemoteStore for FlakyBackend {
    async fn upsert(&self, request: &UpsertRequest) -> Result<(), RemoteError> {
        *self.attempts.lock().entry(request.collection.to_string()).or_insert(0) += 1;
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("network unreachable".into()));
        }
        if request.entity == EntityKind::Achievement && !self.migrated.load(Ordering::SeqCst) {
            return Err(RemoteError::Permanent("missing column 'badge'".into()));
        }
        println!("   └─ upsert {} for {} ({})", request.collection, request.owner, request.operation);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt().with_target(false).compact().init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           offline-sync: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the engine
    // ─────────────────────────────────────────────────────────────────────────
    let dir = std::env::temp_dir().join(format!("offline-sync-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let config = SyncEngineConfig {
        store_path: Some(dir.join("sync_queue.db").to_string_lossy().to_string()),
        max_queue_size: 100,
        ..Default::default()
    };

    let backend = Arc::new(FlakyBackend {
        online: AtomicBool::new(false),
        migrated: AtomicBool::new(false),
        attempts: Mutex::new(HashMap::new()),
    });
    let engine = SyncEngine::open(config, backend.clone()).await?;
    engine.start().await?;
    assert_eq!(engine.state(), EngineState::Ready);
    println!("📦 Engine ready, queue file in {}", dir.display());

    let invalidated = Arc::new(Mutex::new(Vec::new()));
    let sink = invalidated.clone();
    engine.cache().register(
        EntityKind::MoodEntry,
        Arc::new(move |kind: EntityKind, owner: &OwnerId| sink.lock().push(format!("{}/{}", kind, owner))),
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Record changes while offline
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Recording changes while offline...");
    let changes = vec![
        (Operation::Create, "mood_entry", json!({"user_id": ALICE, "mood": 4, "id": "m-1"}), None),
        (Operation::Update, "user_profile", json!({"userId": BOB, "name": "Bob", "auth_token": "secret"}), Some(Priority::High)),
        (Operation::Create, "achievement", json!({"user_id": ALICE, "id": "first-week"}), Some(Priority::Low)),
        (Operation::Create, "chat_message", json!({"user_id": ALICE}), None),
        (Operation::Create, "mood_entry", json!({"user_id": "anonymous"}), None),
    ];
    let mut achievement_id = None;
    for (operation, entity, payload, priority) in changes {
        match engine.enqueue(operation, entity, payload, priority).await {
            Ok(id) => {
                println!("   └─ queued {} {} → {}", operation, entity, id);
                if entity == "achievement" {
                    achievement_id = Some(id);
                }
            }
            Err(e) => println!("   └─ rejected {} {}: {}", operation, entity, e),
        }
    }
    println!("   Status: {:?}", engine.status());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Offline cycle: everything backs off
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Sync cycle while offline...");
    let report = engine.run_cycle(0).await;
    println!("   └─ {:?}", report);
    for item in engine.queue().snapshot() {
        println!(
            "   └─ {} retry #{} at {:?} ms",
            item.entity_kind, item.retry_count, item.next_attempt_at
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Back online: sync, dead letter, re-queue
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📶 Connectivity restored, syncing...");
    backend.online.store(true, Ordering::SeqCst);
    let report = engine.run_cycle(10_000).await;
    println!("   └─ {:?}", report);

    for dead in engine.dead_letters().list() {
        println!("   ⚠️  dead letter {}: {}", dead.item.entity_kind, dead.failure_reason);
    }
    if let Some(id) = achievement_id {
        if engine.dead_letters().get(&id).is_some() {
            println!("\n🔁 Backend migrated, re-queueing the dead letter...");
            backend.migrated.store(true, Ordering::SeqCst);
            engine.requeue_dead_letter(&id).await?;
            let report = engine.run_cycle(20_000).await;
            println!("   └─ {:?}", report);
        }
    }

    println!("\n🧹 Cache invalidations: {:?}", invalidated.lock());
    println!("   Remote attempts by collection: {:?}", backend.attempts.lock());
    println!("   Status: {:?}", engine.status());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.shutdown().await;
    println!("   ✅ Shutdown complete! State: {:?}", engine.state());

    if let Err(e) = std::fs::remove_dir_all(&dir) {
        println!("   └─ Warning: could not remove {}: {}", dir.display(), e);
    }

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let label_str = if labels.is_empty() {
                String::new()
            } else {
                format!("{{{}}}", labels.join(","))
            };
            let rendered = match value {
                DebugValue::Counter(v) => format!("counter {}", v),
                DebugValue::Gauge(v) => format!("gauge {:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => {
                    let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                    format!("histogram count={} sum={:.4}", samples.len(), sum)
                }
            };
            format!("{}{} {}", key.name(), label_str, rendered)
        })
        .collect();
    lines.sort();
    for line in lines {
        println!("   └─ {}", line);
    }
}
