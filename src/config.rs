// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the registry core.
//!
//! # Example
//!
//! ```
//! use service_registry::{OverflowPolicy, RegistryConfig};
//!
//! // Minimal config (uses defaults)
//! let config = RegistryConfig::default();
//! assert_eq!(config.eviction_allowed_percentage_drop, 20);
//!
//! // Tuned config
//! let config = RegistryConfig {
//!     eviction_allowed_percentage_drop: 50,
//!     lease_duration_ms: 30_000,
//!     overflow_policy: OverflowPolicy::DropNewest,
//!     ..Default::default()
//! };
//! assert_eq!(config.lease_duration().map(|d| d.as_secs()), Some(30));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::backpressure::OverflowPolicy;

/// Configuration for the registry.
///
/// All fields have defaults; loading it from a file or environment is left
/// to the embedding server.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Largest share of the expected registry size (percent) that evictions
    /// may remove. 0 disables eviction entirely.
    #[serde(default = "default_eviction_allowed_percentage_drop")]
    pub eviction_allowed_percentage_drop: u8,

    /// Default lease for a connected source in milliseconds (0 = no lease)
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,

    /// Live notification buffer per interest stream
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// What a full subscriber buffer does
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Bound on queued writer commands; ingestion waits when it is full
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// How long a reconnected source has to re-register its predecessor's
    /// entries before the leftovers go to the eviction queue (milliseconds)
    #[serde(default = "default_reconnect_grace_ms")]
    pub reconnect_grace_ms: u64,
}

fn default_eviction_allowed_percentage_drop() -> u8 { 20 }
fn default_lease_duration_ms() -> u64 { 90_000 } // 90 s
fn default_subscriber_buffer() -> usize { 1024 }
fn default_command_queue_capacity() -> usize { 4096 }
fn default_reconnect_grace_ms() -> u64 { 30_000 } // 30 s

impl RegistryConfig {
    /// Default per-source lease, `None` when leases are disabled.
    #[must_use]
    pub fn lease_duration(&self) -> Option<Duration> {
        (self.lease_duration_ms > 0).then(|| Duration::from_millis(self.lease_duration_ms))
    }

    #[must_use]
    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            eviction_allowed_percentage_drop: default_eviction_allowed_percentage_drop(),
            lease_duration_ms: default_lease_duration_ms(),
            subscriber_buffer: default_subscriber_buffer(),
            overflow_policy: OverflowPolicy::default(),
            command_queue_capacity: default_command_queue_capacity(),
            reconnect_grace_ms: default_reconnect_grace_ms(),
        }
    }
}
