// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the registry.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding server is responsible for installing an exporter.
//!
//! # Metric Naming Convention
//! - `registry_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `origin`: local, replicated, interested
//! - `kind`: add, modify, delete
//! - `command`: register, unregister, subscribe, source_ended, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::notification::ChangeKind;
use crate::source::Origin;

// ═══════════════════════════════════════════════════════════════════════════
// Registry contents
// ═══════════════════════════════════════════════════════════════════════════

/// Set number of distinct registered instance ids
pub fn set_registry_size(size: usize) {
    gauge!("registry_size").set(size as f64);
}

/// Record an applied registration
pub fn record_registration(origin: Origin) {
    counter!(
        "registry_registrations_total",
        "origin" => origin.as_str()
    )
    .increment(1);
}

/// Record an applied unregistration (explicit, stream completion or eviction)
pub fn record_unregistration(origin: Origin, reason: &'static str) {
    counter!(
        "registry_unregistrations_total",
        "origin" => origin.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// Record an update rejected at the ingestion boundary
pub fn record_malformed_update(origin: Origin) {
    counter!(
        "registry_malformed_updates_total",
        "origin" => origin.as_str()
    )
    .increment(1);
}

/// Record a source connection being bound or ended
pub fn record_source_event(origin: Origin, event: &'static str) {
    counter!(
        "registry_source_events_total",
        "origin" => origin.as_str(),
        "event" => event
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Notifications and subscribers
// ═══════════════════════════════════════════════════════════════════════════

/// Record notifications produced by the data store
pub fn record_notification(kind: ChangeKind) {
    counter!(
        "registry_notifications_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Set number of active interest subscriptions
pub fn set_subscriptions(count: usize) {
    gauge!("registry_subscriptions").set(count as f64);
}

/// Record a subscriber disconnected for lagging
pub fn record_slow_subscriber_disconnect() {
    counter!("registry_slow_subscriber_disconnects_total").increment(1);
}

/// Record a live notification dropped at a full subscriber buffer
pub fn record_subscriber_drop() {
    counter!("registry_subscriber_dropped_notifications_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Eviction and self-preservation
// ═══════════════════════════════════════════════════════════════════════════

/// Set number of pending evictions
pub fn set_eviction_queue_depth(depth: usize) {
    gauge!("registry_eviction_queue_depth").set(depth as f64);
}

/// Record queued evictions that were granted and applied
pub fn record_evictions_granted(count: usize) {
    counter!("registry_evictions_granted_total").increment(count as u64);
}

/// Record queued evictions cancelled by a fresh registration
pub fn record_eviction_cancelled() {
    counter!("registry_evictions_cancelled_total").increment(1);
}

/// Set self-preservation flag (1 = active)
pub fn set_self_preservation(active: bool) {
    gauge!("registry_self_preservation").set(if active { 1.0 } else { 0.0 });
}

/// Record a source lease expiring without renewal
pub fn record_lease_expiry(origin: Origin) {
    counter!(
        "registry_lease_expiries_total",
        "origin" => origin.as_str()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Writer
// ═══════════════════════════════════════════════════════════════════════════

/// Record writer command latency
pub fn record_command_latency(command: &str, duration: Duration) {
    histogram!(
        "registry_command_seconds",
        "command" => command.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set registry state (for monitoring lifecycle transitions)
pub fn set_registry_state(state: &str) {
    counter!(
        "registry_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records writer command latency on drop
pub struct LatencyTimer {
    command: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(command: &'static str) -> Self {
        Self { command, start: Instant::now() }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_command_latency(self.command, self.start.elapsed());
    }
}
