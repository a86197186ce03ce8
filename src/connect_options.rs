// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-connection options for source ingestion.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use service_registry::{ConnectOptions, RegistryConfig};
//!
//! let config = RegistryConfig::default();
//!
//! // Registry default lease (90 s)
//! let opts = ConnectOptions::from_config(&config);
//! assert_eq!(opts.lease, Some(Duration::from_secs(90)));
//!
//! // Peer replication streams are usually not leased
//! let opts = ConnectOptions::without_lease();
//! assert!(opts.lease.is_none());
//! ```

use std::time::Duration;

use crate::config::RegistryConfig;

/// Options controlling how a connected source is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectOptions {
    /// Lease for the source; expiry ends the source through the eviction
    /// queue. `None` disables the lease.
    pub lease: Option<Duration>,
}

impl ConnectOptions {
    /// Lease taken from the registry config.
    #[must_use]
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self { lease: config.lease_duration() }
    }

    #[must_use]
    pub fn with_lease(lease: Duration) -> Self {
        Self { lease: Some(lease) }
    }

    #[must_use]
    pub fn without_lease() -> Self {
        Self { lease: None }
    }
}
