// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The registry's single writer.
//!
//! Every mutation of the data store, the eviction queue and the quota keeper
//! happens here, one command at a time. Subscriptions are registered here
//! too, so a subscriber's replay and its first live notification can never
//! interleave with a write.
//!
//! Entries of a superseded connection are parked rather than queued: the
//! replacement re-registers most of them, and only the leftovers ask the
//! quota for permits once the replacement signals it has caught up
//! (`BufferEnd`), ends, or its grace period runs out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::eviction::{EvictionItem, EvictionQueue, EvictionQuotaKeeper};
use crate::holder::SourcedCopy;
use crate::hub::{InterestStream, NotificationHub};
use crate::instance::InstanceInfo;
use crate::interest::Interest;
use crate::lease::LeaseTimer;
use crate::metrics::{self, LatencyTimer};
use crate::notification::{BufferState, ChangeNotification};
use crate::source::{Source, SourceKey, SourceMatcher};
use crate::store::DataStore;

use super::types::{RegistryState, StreamEnd};

/// A connected ingestion source.
pub(crate) struct Binding {
    pub(crate) source: Source,
    pub(crate) ingest: AbortHandle,
    pub(crate) lease: Option<Arc<LeaseTimer>>,
}

impl Binding {
    pub(crate) fn release(&self) {
        self.ingest.abort();
        if let Some(lease) = &self.lease {
            lease.cancel();
        }
    }
}

pub(crate) type Bindings = Arc<Mutex<HashMap<SourceKey, Binding>>>;

/// Writer-maintained status readable without a round trip.
#[derive(Default)]
pub(crate) struct SharedStatus {
    pub(crate) pending_evictions: AtomicUsize,
    pub(crate) self_preservation: AtomicBool,
}

pub(crate) enum Command {
    Register {
        source: Source,
        info: Arc<InstanceInfo>,
        ack: Option<oneshot::Sender<()>>,
    },
    Unregister {
        source: Source,
        id: String,
        ack: Option<oneshot::Sender<()>>,
    },
    Buffer {
        source: Source,
        state: BufferState,
    },
    SourceEnded {
        source: Source,
        end: StreamEnd,
    },
    /// Grace period for a superseded connection ran out
    ReleaseSuperseded {
        source: Source,
    },
    Subscribe {
        interest: Arc<Interest>,
        matcher: SourceMatcher,
        reply: oneshot::Sender<InterestStream>,
    },
    EvictAllExcept {
        retain: SourceMatcher,
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct RegistryActor {
    pub(crate) store: Arc<DataStore>,
    pub(crate) hub: Arc<NotificationHub>,
    pub(crate) bindings: Bindings,
    pub(crate) quota: EvictionQuotaKeeper,
    pub(crate) queue: EvictionQueue,
    /// Superseded copies awaiting re-registration; no permits requested yet
    pub(crate) parked: EvictionQueue,
    pub(crate) commands: mpsc::Receiver<Command>,
    pub(crate) state: Arc<watch::Sender<RegistryState>>,
    pub(crate) status: Arc<SharedStatus>,
}

impl RegistryActor {
    pub(crate) async fn run(mut self) {
        debug!("Registry writer started");
        while let Some(command) = self.commands.recv().await {
            let stop = matches!(command, Command::Shutdown { .. });
            self.handle(command);
            if stop {
                break;
            }
        }
        debug!("Registry writer stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { source, info, ack } => {
                let _timer = LatencyTimer::new("register");
                self.register(source, info);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Unregister { source, id, ack } => {
                let _timer = LatencyTimer::new("unregister");
                self.unregister(&source, &id);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Buffer { source, state } => {
                let caught_up = state == BufferState::BufferEnd && self.is_bound(&source);
                let note = ChangeNotification::bracket(
                    state,
                    Arc::new(Interest::FullRegistry),
                    Some(source.clone()),
                );
                self.hub.publish(&note, None);
                if caught_up {
                    self.release_predecessors(&source);
                    self.after_mutation();
                }
            }
            Command::SourceEnded { source, end } => {
                let _timer = LatencyTimer::new("source_ended");
                self.source_ended(source, end);
            }
            Command::ReleaseSuperseded { source } => {
                let queued = self.release_parked(|item| item.source == source);
                if queued > 0 {
                    debug!(source = %source, queued, "Reconnect grace expired");
                    self.after_mutation();
                }
            }
            Command::Subscribe { interest, matcher, reply } => {
                let _timer = LatencyTimer::new("subscribe");
                let stream = self.subscribe(interest, matcher);
                // A dropped requester drops the stream, which unsubscribes it.
                let _ = reply.send(stream);
            }
            Command::EvictAllExcept { retain, reply } => {
                let _timer = LatencyTimer::new("evict_all_except");
                let copies = self.store.copies_where(|s| !retain.matches(s));
                let queued = self.enqueue(copies);
                info!(retain = %retain, queued, "Evicting all copies except retained sources");
                self.after_mutation();
                let _ = reply.send(queued);
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn register(&mut self, source: Source, info: Arc<InstanceInfo>) {
        let reclaimed = self.parked.cancel(&info.id, &source);
        if reclaimed > 0 {
            debug!(id = %info.id, source = %source, "Superseded copy re-registered");
        }
        let cancelled = self.queue.cancel(&info.id, &source);
        if cancelled > 0 {
            self.quota.withdraw(cancelled);
            for _ in 0..cancelled {
                metrics::record_eviction_cancelled();
            }
            debug!(id = %info.id, source = %source, "Queued eviction cancelled by registration");
        }

        let previous = self.store.snapshot_of(&info.id);
        let origin = source.origin;
        let notes = self.store.update(source.clone(), info);
        let superseded = previous
            .filter(|p| !p.source.is_same_logical(&source))
            .map(|p| (p.source, p.info));
        self.dispatch(notes, superseded.as_ref());
        metrics::record_registration(origin);
        self.after_mutation();
    }

    fn unregister(&mut self, source: &Source, id: &str) {
        let cancelled = self.queue.cancel(id, source);
        if cancelled > 0 {
            self.quota.withdraw(cancelled);
        }
        let before = self.store.len();
        let notes = self.store.remove(id, source);
        let removed = before.saturating_sub(self.store.len());
        self.quota.release_expected(removed);
        if !notes.is_empty() {
            metrics::record_unregistration(source.origin, "explicit");
        }
        self.dispatch(notes, None);
        self.after_mutation();
    }

    fn source_ended(&mut self, source: Source, end: StreamEnd) {
        let key = source.logical_key();
        let binding = {
            let mut bindings = self.bindings.lock();
            let bound = bindings.get(&key).is_some_and(|b| b.source == source);
            if bound {
                bindings.remove(&key)
            } else {
                None
            }
        };
        if binding.is_none() && end != StreamEnd::Superseded {
            debug!(source = %source, end = end.as_str(), "Ignoring end of a connection no longer bound");
            return;
        }
        if let Some(binding) = binding {
            binding.release();
            self.release_predecessors(&source);
        }
        metrics::record_source_event(source.origin, end.as_str());

        match end {
            StreamEnd::Completed => {
                let cancelled = self.queue.cancel_source(&source);
                if cancelled > 0 {
                    self.quota.withdraw(cancelled);
                }
                let before = self.store.len();
                let copies = self.store.copies_from(&source);
                let count = copies.len();
                for copy in copies {
                    let notes = self.store.remove(&copy.info.id, &source);
                    self.dispatch(notes, None);
                    metrics::record_unregistration(source.origin, "completed");
                }
                self.quota.release_expected(before.saturating_sub(self.store.len()));
                info!(source = %source, removed = count, "Source completed");
            }
            StreamEnd::Failed(err) => {
                let copies = self.store.copies_from(&source);
                let queued = self.enqueue(copies);
                warn!(source = %source, error = %err, queued, "Source failed; entries queued for eviction");
            }
            StreamEnd::LeaseExpired => {
                metrics::record_lease_expiry(source.origin);
                let copies = self.store.copies_from(&source);
                let queued = self.enqueue(copies);
                warn!(source = %source, queued, "Source lease expired; entries queued for eviction");
            }
            StreamEnd::Superseded => {
                let mut parked = 0;
                for copy in self.store.copies_from(&source) {
                    if self.parked.push(EvictionItem::new(copy.info, copy.source)) {
                        parked += 1;
                    }
                }
                info!(source = %source, parked, "Source superseded by reconnect");
            }
        }
        self.after_mutation();
    }

    fn subscribe(&mut self, interest: Arc<Interest>, matcher: SourceMatcher) -> InterestStream {
        let mut replay = vec![ChangeNotification::bracket(
            BufferState::BufferStart,
            Arc::clone(&interest),
            None,
        )];
        for copy in self.store.snapshots() {
            if interest.matches(&copy.info) && matcher.matches(&copy.source) {
                replay.push(ChangeNotification::add(copy.info, copy.source));
            }
        }
        replay.push(ChangeNotification::bracket(
            BufferState::BufferEnd,
            Arc::clone(&interest),
            None,
        ));
        self.hub.subscribe(interest, matcher, replay)
    }

    /// Queue removals and ask for permits. Returns how many were queued.
    fn enqueue(&mut self, copies: Vec<SourcedCopy>) -> usize {
        self.enqueue_items(copies.into_iter().map(|c| EvictionItem::new(c.info, c.source)))
    }

    fn enqueue_items(&mut self, items: impl IntoIterator<Item = EvictionItem>) -> usize {
        let mut queued = 0;
        for item in items {
            if self.queue.push(item) {
                queued += 1;
            }
        }
        if queued > 0 {
            self.quota.request(queued);
        }
        queued
    }

    /// Move parked items matching `pred` to the eviction queue.
    fn release_parked<F>(&mut self, pred: F) -> usize
    where
        F: FnMut(&EvictionItem) -> bool,
    {
        let items = self.parked.take_where(pred);
        self.enqueue_items(items)
    }

    /// `source` is done re-registering: whatever older connections of the
    /// same logical source still hold is now subject to the quota.
    fn release_predecessors(&mut self, source: &Source) {
        let queued =
            self.release_parked(|item| item.source.is_same_logical(source) && item.source != *source);
        if queued > 0 {
            info!(source = %source, queued, "Queued entries not re-registered after reconnect");
        }
    }

    fn is_bound(&self, source: &Source) -> bool {
        self.bindings
            .lock()
            .get(&source.logical_key())
            .is_some_and(|b| b.source == *source)
    }

    fn dispatch(&self, notes: Vec<ChangeNotification>, superseded: Option<&(Source, Arc<InstanceInfo>)>) {
        for note in notes {
            if let Some(kind) = note.kind() {
                metrics::record_notification(kind);
            }
            self.hub.publish(&note, superseded);
        }
    }

    fn after_mutation(&mut self) {
        if self.quota.is_feed_lost() {
            self.quota.reattach(self.store.size_receiver());
        }
        self.quota.poll_size();
        self.drain();
        let pending = self.queue.len() + self.parked.len();
        metrics::set_registry_size(self.store.len());
        metrics::set_eviction_queue_depth(pending);
        self.status.pending_evictions.store(pending, Ordering::Release);
        self.status
            .self_preservation
            .store(self.quota.is_in_self_preservation(), Ordering::Release);
    }

    /// Apply one queued removal per granted permit, in enqueue order.
    fn drain(&mut self) {
        let mut evicted = 0;
        while self.quota.outstanding() > 0 {
            let Some(item) = self.queue.pop_front() else {
                // Nothing left to spend permits on.
                let unused = self.quota.outstanding();
                self.quota.withdraw(unused);
                break;
            };
            let notes = self.store.remove(&item.info.id, &item.source);
            self.quota.consume();
            if !notes.is_empty() {
                metrics::record_unregistration(item.source.origin, "evicted");
            }
            debug!(id = %item.info.id, source = %item.source, waited = ?item.age(), "Evicted");
            self.dispatch(notes, None);
            evicted += 1;
            self.quota.poll_size();
        }
        if evicted > 0 {
            metrics::record_evictions_granted(evicted);
        }
    }

    fn shutdown(&mut self) {
        self.state.send_replace(RegistryState::ShuttingDown);
        metrics::set_registry_state("ShuttingDown");
        self.hub.shutdown();

        let released: Vec<Binding> = self.bindings.lock().drain().map(|(_, b)| b).collect();
        for binding in &released {
            binding.release();
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            self.quota.withdraw(dropped);
        }
        let dropped = dropped + self.parked.clear();
        self.status.pending_evictions.store(0, Ordering::Release);
        info!(sources = released.len(), dropped_evictions = dropped, "Registry writer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::OverflowPolicy;
    use crate::source::Origin;

    /// A writer whose quota keeper starts on a feed that has already ended.
    fn writer_on_dead_feed() -> RegistryActor {
        let (feed_tx, feed_rx) = watch::channel(0);
        drop(feed_tx);
        let (_commands_tx, commands) = mpsc::channel(8);
        RegistryActor {
            store: Arc::new(DataStore::new()),
            hub: Arc::new(NotificationHub::new(16, OverflowPolicy::Disconnect)),
            bindings: Arc::new(Mutex::new(HashMap::new())),
            quota: EvictionQuotaKeeper::new(20, feed_rx),
            queue: EvictionQueue::new(),
            parked: EvictionQueue::new(),
            commands,
            state: Arc::new(watch::channel(RegistryState::Running).0),
            status: Arc::new(SharedStatus::default()),
        }
    }

    fn register(writer: &mut RegistryActor, source: &Source, id: &str) {
        writer.handle(Command::Register {
            source: source.clone(),
            info: Arc::new(InstanceInfo::new(id, "app")),
            ack: None,
        });
    }

    #[test]
    fn test_lost_size_feed_is_reattached_to_store() {
        let mut writer = writer_on_dead_feed();
        let peer = Source::replicated("peer");
        for i in 0..10 {
            register(&mut writer, &peer, &format!("i-{i}"));
        }
        assert!(!writer.quota.is_feed_lost());
        assert_eq!(writer.quota.expected(), 10);

        let (reply, mut queued) = oneshot::channel();
        writer.handle(Command::EvictAllExcept { retain: SourceMatcher::origin(Origin::Local), reply });
        assert_eq!(queued.try_recv().unwrap(), 10);

        // 10 expected, 20% drop: two removals go through.
        assert_eq!(writer.store.len(), 8);
        assert_eq!(writer.queue.len(), 8);
        assert!(writer.quota.is_in_self_preservation());
    }

    #[test]
    fn test_superseded_copies_park_until_caught_up() {
        let mut writer = writer_on_dead_feed();
        let old = Source::replicated("peer");
        for i in 0..10 {
            register(&mut writer, &old, &format!("i-{i}"));
        }

        let new = old.reconnect();
        writer.handle(Command::SourceEnded { source: old.clone(), end: StreamEnd::Superseded });
        assert_eq!(writer.parked.len(), 10);
        assert_eq!(writer.quota.pending() + writer.quota.outstanding(), 0);
        assert_eq!(writer.store.len(), 10);

        for i in 0..7 {
            register(&mut writer, &new, &format!("i-{i}"));
        }
        assert_eq!(writer.parked.len(), 3);
        assert_eq!(writer.status.pending_evictions.load(Ordering::Acquire), 3);

        // Grace expiry hands the leftovers to the quota.
        writer.handle(Command::ReleaseSuperseded { source: old });
        assert!(writer.parked.is_empty());
        assert_eq!(writer.store.len(), 8);
        assert_eq!(writer.queue.len(), 1);
        assert!(writer.quota.is_in_self_preservation());
    }
}
