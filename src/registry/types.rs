// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the registry façade.

use serde::Serialize;

use crate::error::SourceError;
use crate::instance::InstanceInfo;
use crate::notification::BufferState;

/// Registry lifecycle state.
///
/// Use [`super::Registry::state()`] to check the current state or
/// [`super::Registry::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegistryState {
    /// Built, writer not yet running; commands queue until start
    Created,
    /// Writer running
    Running,
    /// Completing subscriptions and releasing sources
    ShuttingDown,
    /// Fully stopped; every operation is a no-op or `Closed`
    Stopped,
}

impl std::fmt::Display for RegistryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// One event on a source's ingestion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationEvent {
    /// Add or replace this source's copy of the instance
    Register(InstanceInfo),
    /// Remove this source's copy of the instance with this id
    Unregister(String),
    /// Bracket marker around a bulk replay from the source
    Buffer(BufferState),
}

/// How a source's ingestion ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamEnd {
    /// Stream finished or the connection was closed: remove immediately
    Completed,
    /// Stream failed: evict under quota
    Failed(SourceError),
    /// No renewal within the lease: evict under quota
    LeaseExpired,
    /// A newer connection of the same logical source took over
    Superseded,
}

impl StreamEnd {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::LeaseExpired => "lease_expired",
            Self::Superseded => "superseded",
        }
    }
}

/// Point-in-time summary of registry health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryHealth {
    pub state: RegistryState,
    /// Distinct registered instance ids
    pub size: usize,
    /// Active interest subscriptions
    pub subscriptions: usize,
    /// Connected ingestion sources
    pub sources: usize,
    /// Removals waiting for an eviction permit
    pub pending_evictions: usize,
    pub self_preservation: bool,
}

impl RegistryHealth {
    /// Running and not holding back evictions.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == RegistryState::Running && !self.self_preservation
    }
}
