// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::instance::InstanceInfo;
use crate::source::Source;

/// A removal waiting for an eviction permit.
#[derive(Debug, Clone)]
pub struct EvictionItem {
    pub info: Arc<InstanceInfo>,
    /// Exact source whose copy is to be removed
    pub source: Source,
    pub enqueued_at: Instant,
}

impl EvictionItem {
    pub fn new(info: Arc<InstanceInfo>, source: Source) -> Self {
        Self { info, source, enqueued_at: Instant::now() }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    fn key(&self) -> (String, Uuid) {
        (self.info.id.clone(), self.source.id)
    }
}

/// Pending removals in enqueue order.
///
/// At most one item is queued per (instance id, exact source).
#[derive(Debug, Default)]
pub struct EvictionQueue {
    items: VecDeque<EvictionItem>,
    queued: HashSet<(String, Uuid)>,
}

impl EvictionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `item`; returns `false` if the same removal is already queued.
    pub fn push(&mut self, item: EvictionItem) -> bool {
        if !self.queued.insert(item.key()) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub fn pop_front(&mut self) -> Option<EvictionItem> {
        let item = self.items.pop_front()?;
        self.queued.remove(&item.key());
        Some(item)
    }

    /// Drop queued removals of `id` by any connection of `source`'s logical
    /// source. Returns how many were dropped.
    pub fn cancel(&mut self, id: &str, source: &Source) -> usize {
        self.take_where(|item| item.info.id == id && item.source.is_same_logical(source)).len()
    }

    /// Drop every queued removal for exactly `source`.
    pub fn cancel_source(&mut self, source: &Source) -> usize {
        self.take_where(|item| item.source == *source).len()
    }

    /// Remove and return the items matching `pred`, keeping their order.
    pub fn take_where<F>(&mut self, mut pred: F) -> Vec<EvictionItem>
    where
        F: FnMut(&EvictionItem) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if pred(&item) {
                self.queued.remove(&item.key());
                taken.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.items = kept;
        taken
    }

    pub fn contains(&self, id: &str, source: &Source) -> bool {
        self.items
            .iter()
            .any(|item| item.info.id == id && item.source.is_same_logical(source))
    }

    pub fn oldest_age(&self) -> Option<Duration> {
        self.items.front().map(EvictionItem::age)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvictionItem> {
        self.items.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove everything, returning how many items were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        self.queued.clear();
        n
    }
}
