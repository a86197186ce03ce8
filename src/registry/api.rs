// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Registry API: registration, queries and subscriptions.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use super::actor::Command;
use super::{Registry, RegistryHealth};
use crate::error::RegistryError;
use crate::holder::HolderSummary;
use crate::hub::InterestStream;
use crate::instance::InstanceInfo;
use crate::interest::Interest;
use crate::metrics;
use crate::source::{Source, SourceMatcher};

impl Registry {
    /// Register `info` as `source`'s copy of the instance.
    ///
    /// Returns once the writer has applied it. Only malformed input is
    /// reported; reconciliation outcomes are visible through subscriptions.
    #[tracing::instrument(skip(self, info), fields(id = %info.id, source = %source))]
    pub async fn register(&self, source: &Source, info: InstanceInfo) -> Result<(), RegistryError> {
        if let Err(e) = info.validate() {
            metrics::record_malformed_update(source.origin);
            warn!(error = %e, "Rejected registration");
            return Err(e);
        }
        let (ack, done) = oneshot::channel();
        self.send(Command::Register { source: source.clone(), info: Arc::new(info), ack: Some(ack) })
            .await?;
        done.await.map_err(|_| RegistryError::Closed)
    }

    /// Remove `source`'s copy of instance `id` immediately.
    ///
    /// A source that never registered `id`, or an older connection of the
    /// source holding it, is a silent no-op.
    #[tracing::instrument(skip(self), fields(source = %source))]
    pub async fn unregister(&self, source: &Source, id: &str) -> Result<(), RegistryError> {
        if id.trim().is_empty() {
            metrics::record_malformed_update(source.origin);
            warn!("Rejected unregistration with empty id");
            return Err(RegistryError::malformed("empty instance id"));
        }
        let (ack, done) = oneshot::channel();
        self.send(Command::Unregister { source: source.clone(), id: id.to_string(), ack: Some(ack) })
            .await?;
        done.await.map_err(|_| RegistryError::Closed)
    }

    /// Subscribe to instances matching `interest`, optionally restricted to
    /// copies from sources accepted by `matcher`.
    ///
    /// The stream starts with `BufferStart`, one `Add` per matching instance
    /// and `BufferEnd`, then continues with live changes. A registry that
    /// has shut down returns an already-completed stream.
    #[tracing::instrument(skip(self), fields(interest = %interest))]
    pub async fn for_interest(&self, interest: Interest, matcher: Option<SourceMatcher>) -> InterestStream {
        let interest = Arc::new(interest);
        let (reply, stream) = oneshot::channel();
        let command = Command::Subscribe {
            interest: Arc::clone(&interest),
            matcher: matcher.unwrap_or_default(),
            reply,
        };
        if self.commands.send(command).await.is_err() {
            debug!("Registry closed; returning completed stream");
            return InterestStream::closed(interest);
        }
        match stream.await {
            Ok(stream) => stream,
            Err(_) => InterestStream::closed(interest),
        }
    }

    /// Instances currently matching `interest` (snapshot copies only).
    pub fn for_snapshot(&self, interest: &Interest) -> Vec<Arc<InstanceInfo>> {
        self.for_snapshot_from(interest, &SourceMatcher::Any)
    }

    /// Like [`Registry::for_snapshot`], keeping only instances whose snapshot
    /// copy came from a source accepted by `matcher`.
    pub fn for_snapshot_from(&self, interest: &Interest, matcher: &SourceMatcher) -> Vec<Arc<InstanceInfo>> {
        self.store
            .snapshots()
            .into_iter()
            .filter(|copy| interest.matches(&copy.info) && matcher.matches(&copy.source))
            .map(|copy| copy.info)
            .collect()
    }

    /// Queue every copy held by a source `retain` rejects for quota-governed
    /// eviction. Returns the number of copies queued (0 once shut down).
    #[tracing::instrument(skip(self), fields(retain = %retain))]
    pub async fn evict_all_except(&self, retain: SourceMatcher) -> usize {
        let (reply, done) = oneshot::channel();
        if self.send(Command::EvictAllExcept { retain, reply }).await.is_err() {
            return 0;
        }
        done.await.unwrap_or(0)
    }

    /// Number of distinct registered instance ids.
    #[must_use]
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Size feed, updated after every mutation that changes the size.
    pub fn size_receiver(&self) -> watch::Receiver<usize> {
        self.store.size_receiver()
    }

    /// Per-instance view of which sources hold a copy, ordered by id.
    pub fn holders(&self) -> Vec<HolderSummary> {
        self.store.summaries()
    }

    /// Evictions are being held back by the quota.
    #[must_use]
    pub fn is_in_self_preservation(&self) -> bool {
        self.status.self_preservation.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn pending_evictions(&self) -> usize {
        self.status.pending_evictions.load(Ordering::Acquire)
    }

    /// Active interest subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.hub.len()
    }

    /// Connected ingestion sources.
    #[must_use]
    pub fn sources(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn health(&self) -> RegistryHealth {
        RegistryHealth {
            state: self.state(),
            size: self.size(),
            subscriptions: self.subscriptions(),
            sources: self.sources(),
            pending_evictions: self.pending_evictions(),
            self_preservation: self.is_in_self_preservation(),
        }
    }

    pub(super) async fn send(&self, command: Command) -> Result<(), RegistryError> {
        self.commands.send(command).await.map_err(|_| RegistryError::Closed)
    }
}
