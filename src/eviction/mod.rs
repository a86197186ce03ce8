// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Quota-governed eviction (self-preservation).
//!
//! Removals caused by a source failing, its lease expiring or an explicit
//! `evict_all_except` are never applied directly. They are queued and
//! drained only as the quota keeper grants permits, so a network partition
//! that silences many sources at once cannot empty the registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  queue.rs   - FIFO of pending removals                       │
//! │  └─ EvictionItem: instance + source + enqueue time           │
//! │  └─ cancellation on fresh registration                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  quota.rs   - permit accounting                              │
//! │  └─ EvictionQuotaKeeper: (expected, current) → permits       │
//! │  └─ size feed from the data store (watch channel)            │
//! │  └─ self-preservation state                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry's writer drives both: it enqueues, requests permits, and
//! drains one queued item per permit after every mutation.

pub mod queue;
pub mod quota;

pub use queue::{EvictionItem, EvictionQueue};
pub use quota::{is_eviction_allowed, EvictionQuotaKeeper};
