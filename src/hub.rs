// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fan-out of reconciled change notifications to interest subscribers.
//!
//! ```text
//!   writer ──publish()──► ┌───────────────┐  try_send  ┌─────────────┐
//!                         │ NotificationHub│ ─────────► │ slot buffer │──► InterestStream
//!                         │  (slots map)   │ ─────────► │ slot buffer │──► InterestStream
//!                         └───────────────┘            └─────────────┘
//! ```
//!
//! Each subscription owns a bounded channel. Delivery uses `try_send`, so the
//! writer never waits on a subscriber; a full buffer triggers the configured
//! [`OverflowPolicy`]. The replay a subscription starts with lives in the
//! stream itself and is not bounded by the live buffer.
//!
//! Subscriptions registered by the writer see exactly the notifications
//! published after their replay was captured, in publish order.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, info, warn};

use crate::backpressure::{BackpressureLevel, OverflowPolicy};
use crate::instance::InstanceInfo;
use crate::interest::Interest;
use crate::metrics;
use crate::notification::{ChangeKind, ChangeNotification};
use crate::source::{Source, SourceMatcher};

/// Identifies one interest subscription within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Why an interest stream stopped yielding notifications.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The registry shut down (or was never running).
    #[error("subscription closed")]
    Closed,
    /// The subscriber fell behind and was disconnected after missing
    /// this many notifications.
    #[error("subscriber lagged by {0} notifications")]
    Lagged(u64),
    /// The subscriber cancelled the stream.
    #[error("subscription cancelled")]
    Cancelled,
}

#[derive(Default)]
struct StreamShared {
    lagged: AtomicU64,
    disconnected: AtomicBool,
}

struct Slot {
    interest: Arc<Interest>,
    matcher: SourceMatcher,
    tx: mpsc::Sender<ChangeNotification>,
    shared: Arc<StreamShared>,
    slow: bool,
}

enum Delivery {
    Delivered,
    Dropped,
    Gone,
}

impl Slot {
    fn accepts(&self, info: &InstanceInfo, source: &Source) -> bool {
        self.interest.matches(info) && self.matcher.matches(source)
    }

    fn deliver(
        &mut self,
        id: SubscriptionId,
        note: ChangeNotification,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Delivery {
        match self.tx.try_send(note) {
            Ok(()) => {
                let used = capacity.saturating_sub(self.tx.capacity());
                let level = BackpressureLevel::from_occupancy(used, capacity);
                if level.is_slow() && !self.slow {
                    warn!(subscription = %id, %level, used, capacity, "Slow subscriber");
                }
                self.slow = level.is_slow();
                Delivery::Delivered
            }
            Err(TrySendError::Full(_)) => {
                self.shared.lagged.fetch_add(1, Ordering::Relaxed);
                match policy {
                    OverflowPolicy::Disconnect => {
                        self.shared.disconnected.store(true, Ordering::Release);
                        metrics::record_slow_subscriber_disconnect();
                        warn!(
                            subscription = %id,
                            interest = %self.interest,
                            "Disconnecting subscriber with full buffer"
                        );
                        Delivery::Gone
                    }
                    OverflowPolicy::DropNewest => {
                        metrics::record_subscriber_drop();
                        Delivery::Dropped
                    }
                }
            }
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }
}

struct HubInner {
    closed: bool,
    next_id: u64,
    slots: HashMap<SubscriptionId, Slot>,
}

/// Registry of live interest subscriptions.
pub struct NotificationHub {
    inner: Mutex<HubInner>,
    buffer: usize,
    policy: OverflowPolicy,
}

impl NotificationHub {
    pub fn new(buffer: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(HubInner { closed: false, next_id: 0, slots: HashMap::new() }),
            buffer: buffer.max(1),
            policy,
        }
    }

    /// Register a subscription that will yield `replay` and then every
    /// accepted notification published from now on. A closed hub hands out
    /// an already-completed stream.
    pub fn subscribe(
        self: &Arc<Self>,
        interest: Arc<Interest>,
        matcher: SourceMatcher,
        replay: Vec<ChangeNotification>,
    ) -> InterestStream {
        let mut inner = self.inner.lock();
        if inner.closed {
            return InterestStream::closed(interest);
        }
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        let (tx, rx) = mpsc::channel(self.buffer);
        let shared = Arc::new(StreamShared::default());
        inner.slots.insert(
            id,
            Slot {
                interest: Arc::clone(&interest),
                matcher,
                tx,
                shared: Arc::clone(&shared),
                slow: false,
            },
        );
        metrics::set_subscriptions(inner.slots.len());
        debug!(subscription = %id, interest = %interest, replay = replay.len(), "Subscribed");

        InterestStream {
            id: Some(id),
            interest,
            replay: replay.into(),
            rx: Some(rx),
            hub: Arc::downgrade(self),
            shared,
            cancelled: false,
        }
    }

    /// Push one store-produced notification to every accepting subscription.
    ///
    /// `superseded` is the copy an `Add` displaced as snapshot. Subscriptions
    /// that could see the displaced copy but not the new one get a `Delete`
    /// for it instead, so their view never keeps a dangling entry.
    pub fn publish(&self, note: &ChangeNotification, superseded: Option<&(Source, Arc<InstanceInfo>)>) {
        let mut inner = self.inner.lock();
        if inner.closed || inner.slots.is_empty() {
            return;
        }
        let capacity = self.buffer;
        let policy = self.policy;
        let mut gone = Vec::new();

        for (id, slot) in inner.slots.iter_mut() {
            let mut outgoing: Vec<ChangeNotification> = Vec::with_capacity(1);
            match (note.info(), note.source()) {
                (Some(info), Some(source)) => {
                    if let (Some(ChangeKind::Add), Some((old_source, old_info))) =
                        (note.kind(), superseded)
                    {
                        if slot.accepts(old_info, old_source) && !slot.matcher.matches(source) {
                            outgoing.push(ChangeNotification::delete(
                                Arc::clone(old_info),
                                old_source.clone(),
                            ));
                        }
                    }
                    if slot.accepts(info, source) {
                        outgoing.push(note.clone());
                    }
                }
                _ => {
                    let visible = note.source().map_or(true, |s| slot.matcher.matches(s));
                    if visible {
                        outgoing.push(note.with_interest(&slot.interest));
                    }
                }
            }

            for out in outgoing {
                match slot.deliver(*id, out, capacity, policy) {
                    Delivery::Delivered | Delivery::Dropped => {}
                    Delivery::Gone => {
                        gone.push(*id);
                        break;
                    }
                }
            }
        }

        if !gone.is_empty() {
            for id in gone {
                inner.slots.remove(&id);
            }
            metrics::set_subscriptions(inner.slots.len());
        }
    }

    /// Remove a subscription. Unknown ids and a closed hub are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if inner.slots.remove(&id).is_some() {
            metrics::set_subscriptions(inner.slots.len());
            debug!(subscription = %id, "Unsubscribed");
        }
    }

    /// Complete every subscription and refuse new ones. Returns `false` if
    /// the hub was already shut down.
    pub fn shutdown(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        let completed = inner.slots.len();
        // Dropping the senders completes each stream once its buffer drains.
        inner.slots.clear();
        metrics::set_subscriptions(0);
        info!(completed, "Notification hub shut down");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A subscriber's handle: the bracketed replay followed by live notifications.
///
/// Dropping the handle cancels the subscription.
pub struct InterestStream {
    id: Option<SubscriptionId>,
    interest: Arc<Interest>,
    replay: VecDeque<ChangeNotification>,
    rx: Option<mpsc::Receiver<ChangeNotification>>,
    hub: Weak<NotificationHub>,
    shared: Arc<StreamShared>,
    cancelled: bool,
}

impl InterestStream {
    /// A stream that has already completed.
    pub(crate) fn closed(interest: Arc<Interest>) -> Self {
        Self {
            id: None,
            interest,
            replay: VecDeque::new(),
            rx: None,
            hub: Weak::new(),
            shared: Arc::new(StreamShared::default()),
            cancelled: false,
        }
    }

    /// `None` for a stream handed out by a closed registry.
    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// Notifications this subscriber has missed to a full buffer.
    pub fn lagged(&self) -> u64 {
        self.shared.lagged.load(Ordering::Relaxed)
    }

    /// Next notification, waiting for one if necessary.
    pub async fn recv(&mut self) -> Result<ChangeNotification, SubscriptionError> {
        if self.cancelled {
            return Err(SubscriptionError::Cancelled);
        }
        if let Some(note) = self.replay.pop_front() {
            return Ok(note);
        }
        let Some(rx) = self.rx.as_mut() else {
            return Err(self.end_error());
        };
        match rx.recv().await {
            Some(note) => Ok(note),
            None => Err(self.end_error()),
        }
    }

    /// Next notification if one is ready; `Ok(None)` when none is buffered.
    pub fn try_recv(&mut self) -> Result<Option<ChangeNotification>, SubscriptionError> {
        if self.cancelled {
            return Err(SubscriptionError::Cancelled);
        }
        if let Some(note) = self.replay.pop_front() {
            return Ok(Some(note));
        }
        let Some(rx) = self.rx.as_mut() else {
            return Err(self.end_error());
        };
        match rx.try_recv() {
            Ok(note) => Ok(Some(note)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.end_error()),
        }
    }

    /// Stop delivery. Idempotent, and safe after the registry shut down.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.replay.clear();
        if let Some(rx) = self.rx.as_mut() {
            rx.close();
        }
        if let (Some(id), Some(hub)) = (self.id, self.hub.upgrade()) {
            hub.unsubscribe(id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn end_error(&self) -> SubscriptionError {
        if self.shared.disconnected.load(Ordering::Acquire) {
            SubscriptionError::Lagged(self.lagged())
        } else {
            SubscriptionError::Closed
        }
    }
}

impl Stream for InterestStream {
    type Item = ChangeNotification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        if let Some(note) = this.replay.pop_front() {
            return Poll::Ready(Some(note));
        }
        match this.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for InterestStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for InterestStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterestStream")
            .field("id", &self.id)
            .field("interest", &self.interest)
            .field("replay_pending", &self.replay.len())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
