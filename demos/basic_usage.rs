// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic service-registry usage example.
//!
//! Demonstrates:
//! 1. Subscribing to an interest and reading the bracketed replay
//! 2. Local vs replicated copies of the same instance
//! 3. Snapshot handover when the local copy goes away
//! 4. A failing replication source held back by self-preservation
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::time::Duration;

use futures::stream;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use service_registry::{
    ConnectOptions, InstanceInfo, InstanceStatus, Interest, InterestStream, RegistrationEvent,
    Registry, RegistryConfig, Source, SourceError,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().map_err(|e| e.to_string())?;

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║         service-registry: Basic Usage Example                 ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure, start and subscribe
    // ─────────────────────────────────────────────────────────────────────────
    let config = RegistryConfig { eviction_allowed_percentage_drop: 20, ..Default::default() };
    let registry = Registry::new(config);
    println!("📦 State: {}", registry.state());
    registry.start();
    println!("🚀 State: {}", registry.state());

    let mut billing = registry.for_interest(Interest::application("billing"), None).await;
    print_ready(&mut billing, "replay");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Local and replicated copies
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Registering billing-1 locally and via a peer...");
    let local = Source::local("conn-1");
    let peer = Source::replicated("peer-1");
    registry
        .register(&local, InstanceInfo::new("billing-1", "billing").with_status(InstanceStatus::Up))
        .await?;
    registry
        .register(&peer, InstanceInfo::new("billing-1", "billing").with_status(InstanceStatus::Down))
        .await?;
    print_ready(&mut billing, "live");

    for holder in registry.holders() {
        println!("   └─ {} snapshot from {:?}", holder.id, holder.snapshot_source.map(|s| s.to_string()));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Handover
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔁 Local copy unregistered; the replica takes over...");
    registry.unregister(&local, "billing-1").await?;
    print_ready(&mut billing, "live");

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Self-preservation
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛡️  Peer with 10 instances fails...");
    let local_fleet = Source::local("fleet");
    for i in 0..10 {
        registry
            .register(&local_fleet, InstanceInfo::new(format!("search-{i}"), "search"))
            .await?;
    }
    let mut events: Vec<Result<RegistrationEvent, SourceError>> = (0..10)
        .map(|i| Ok(RegistrationEvent::Register(InstanceInfo::new(format!("edge-{i}"), "edge"))))
        .collect();
    events.push(Err(SourceError::Transport("connection reset".into())));
    let _conn = registry
        .connect(Source::replicated("peer-2"), stream::iter(events), ConnectOptions::default())
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let health = registry.health();
    println!("   └─ size: {}", health.size);
    println!("   └─ pending evictions: {}", health.pending_evictions);
    println!("   └─ self-preservation: {}", health.self_preservation);
    println!("   └─ health: {}", serde_json::to_string(&health)?);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    registry.shutdown().await;
    println!("   ✅ Shutdown complete! State: {}", registry.state());
    println!("   └─ subscription end: {:?}", billing.recv().await);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Print every notification already buffered on `stream`.
fn print_ready(stream: &mut InterestStream, label: &str) {
    while let Ok(Some(note)) = stream.try_recv() {
        println!("   └─ [{label}] {note}");
    }
}

/// Dump all captured metrics
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }
    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, value) in &counters {
            println!("   │  └─ {} = {}", name, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, value) in &gauges {
            println!("   │  └─ {} = {:.2}", name, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("   │  └─ {} count={} avg={:.6}", name, count, avg);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
