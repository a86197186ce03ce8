//! # Service Registry
//!
//! A multi-sourced service registry with change notifications and
//! self-preservation.
//!
//! ## Architecture
//!
//! Every copy of an instance is tagged with the source it came from. One
//! writer task reconciles the copies into a single authoritative snapshot per
//! instance and fans the resulting changes out to interest subscribers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Ingest Layer                          │
//! │  • connect(source, stream) / register() / unregister()      │
//! │  • Malformed updates rejected at the boundary               │
//! │  • Per-source lease timers                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (bounded command queue)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Single Writer (actor)                      │
//! │  • DataStore: id → MultiSourcedHolder                       │
//! │  • Local copies win, else first replica inserted            │
//! │  • Eviction queue gated by the quota keeper                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                  (Add / Modify / Delete / brackets)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Notification Hub                          │
//! │  • Snapshot replay between BufferStart / BufferEnd          │
//! │  • Interest + source-matcher filtering                      │
//! │  • Bounded per-subscriber buffers, slow consumers dropped   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use service_registry::{Interest, InstanceInfo, InstanceStatus, Registry, RegistryConfig, Source};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::new(RegistryConfig::default());
//!     registry.start();
//!
//!     let mut changes = registry.for_interest(Interest::application("billing"), None).await;
//!
//!     let local = Source::local("conn-1");
//!     let info = InstanceInfo::new("i-1", "billing").with_status(InstanceStatus::Up);
//!     registry.register(&local, info).await.unwrap();
//!
//!     // BufferStart, BufferEnd (empty replay), then the live Add
//!     for _ in 0..3 {
//!         println!("{}", changes.recv().await.unwrap());
//!     }
//!
//!     registry.shutdown().await;
//! }
//! ```
//!
//! ## Features
//!
//! - **Source reconciliation**: local registrations outrank replicated copies
//! - **Change streams**: consistent snapshot replay followed by live updates
//! - **Interests**: application, VIP, instance id, regex and composite filters
//! - **Self-preservation**: bulk removals are rate-limited by an eviction quota
//! - **Leases**: sources that stop renewing are evicted through the quota
//! - **Backpressure**: bounded subscriber buffers with an overflow policy
//!
//! ## Configuration
//!
//! See [`RegistryConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`registry`]: The [`Registry`] façade and its writer task
//! - [`store`]: Multi-sourced data store
//! - [`hub`]: Interest subscriptions and notification fan-out
//! - [`eviction`]: Eviction queue and quota keeper
//! - [`lease`]: Per-source lease timers
//! - [`backpressure`]: Subscriber buffer pressure

pub mod backpressure;
pub mod config;
pub mod connect_options;
pub mod error;
pub mod eviction;
pub mod holder;
pub mod hub;
pub mod instance;
pub mod interest;
pub mod lease;
pub mod metrics;
pub mod notification;
pub mod registry;
pub mod source;
pub mod store;

pub use backpressure::{BackpressureLevel, OverflowPolicy};
pub use config::RegistryConfig;
pub use error::{RegistryError, SourceError};
pub use eviction::{EvictionItem, EvictionQueue, EvictionQuotaKeeper};
pub use holder::{HolderSummary, MultiSourcedHolder, SourcedCopy};
pub use hub::{InterestStream, NotificationHub, SubscriptionError, SubscriptionId};
pub use instance::{InstanceInfo, InstanceStatus, ServicePort};
pub use interest::{Interest, Operator, ValueMatcher};
pub use lease::LeaseTimer;
pub use notification::{BufferState, ChangeKind, ChangeNotification};
pub use registry::{
    ConnectOptions, RegistrationEvent, Registry, RegistryHealth, RegistryState, SourceConnection,
};
pub use source::{Origin, Source, SourceKey, SourceMatcher};
pub use store::DataStore;
pub use metrics::LatencyTimer;
