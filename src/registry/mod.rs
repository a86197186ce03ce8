// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Registry façade.
//!
//! The [`Registry`] ties the components together:
//! - a [`DataStore`](crate::DataStore) of multi-sourced holders
//! - a single writer task that applies every mutation in order
//! - a [`NotificationHub`](crate::NotificationHub) fanning changes out to
//!   interest subscribers
//! - an eviction queue governed by the quota keeper (self-preservation)
//! - per-source ingestion tasks and lease timers
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust
//! use service_registry::{Registry, RegistryConfig, RegistryState, InstanceInfo, Source, Interest};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Registry::new(RegistryConfig::default());
//! assert_eq!(registry.state(), RegistryState::Created);
//!
//! registry.start();
//! let local = Source::local("conn-1");
//! registry.register(&local, InstanceInfo::new("i-1", "billing")).await.unwrap();
//!
//! assert_eq!(registry.size(), 1);
//! assert_eq!(registry.for_snapshot(&Interest::application("billing")).len(), 1);
//!
//! registry.shutdown().await;
//! assert_eq!(registry.state(), RegistryState::Stopped);
//! # }
//! ```

mod actor;
mod api;
mod ingest;
mod lifecycle;
mod types;

pub use crate::connect_options::ConnectOptions;
pub use ingest::SourceConnection;
pub use types::{RegistrationEvent, RegistryHealth, RegistryState};

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::RegistryConfig;
use crate::eviction::{EvictionQueue, EvictionQuotaKeeper};
use crate::hub::NotificationHub;
use crate::store::DataStore;

use actor::{Bindings, Command, RegistryActor, SharedStatus};

/// A multi-sourced service registry.
///
/// # Thread Safety
///
/// The registry is `Send + Sync`; share it behind an `Arc`. Reads go
/// straight to the data store, writes are serialized through the writer
/// task started by [`Registry::start`]. Commands issued before `start`
/// queue until the writer runs.
pub struct Registry {
    pub(super) config: RegistryConfig,

    /// id → holder table (written only by the writer task)
    pub(super) store: Arc<DataStore>,

    /// Interest subscriptions
    pub(super) hub: Arc<NotificationHub>,

    /// Connected ingestion sources by logical key
    pub(super) bindings: Bindings,

    /// Writer command queue
    pub(super) commands: mpsc::Sender<Command>,

    /// Writer, until `start` spawns it
    pub(super) pending_actor: Mutex<Option<RegistryActor>>,

    pub(super) actor_task: Mutex<Option<JoinHandle<()>>>,

    /// Registry state (broadcast to watchers)
    pub(super) state: Arc<watch::Sender<RegistryState>>,

    /// Registry state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<RegistryState>,

    /// Eviction status published by the writer
    pub(super) status: Arc<SharedStatus>,

    pub(super) shutdown_started: AtomicBool,
}

impl Registry {
    /// Build a registry. Nothing runs until [`Registry::start`].
    pub fn new(config: RegistryConfig) -> Self {
        let store = Arc::new(DataStore::new());
        let hub = Arc::new(NotificationHub::new(config.subscriber_buffer, config.overflow_policy));
        let bindings: Bindings = Arc::new(Mutex::new(HashMap::new()));
        let (commands, rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let (state, state_rx) = watch::channel(RegistryState::Created);
        let state = Arc::new(state);
        let status = Arc::new(SharedStatus::default());

        let actor = RegistryActor {
            store: Arc::clone(&store),
            hub: Arc::clone(&hub),
            bindings: Arc::clone(&bindings),
            quota: EvictionQuotaKeeper::new(
                config.eviction_allowed_percentage_drop,
                store.size_receiver(),
            ),
            queue: EvictionQueue::new(),
            parked: EvictionQueue::new(),
            commands: rx,
            state: Arc::clone(&state),
            status: Arc::clone(&status),
        };

        Self {
            config,
            store,
            hub,
            bindings,
            commands,
            pending_actor: Mutex::new(Some(actor)),
            actor_task: Mutex::new(None),
            state,
            state_rx,
            status,
            shutdown_started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RegistryState {
        *self.state_rx.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<RegistryState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == RegistryState::Running
    }
}
