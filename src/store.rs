// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The id → holder table backing the registry.
//!
//! Mutations (`update`, `remove`) are only ever issued by the registry's
//! single writer; reads may run concurrently from any task. A holder is
//! dropped from the table in the same call that removes its last copy, and
//! the resulting size is published on a watch channel that feeds the
//! eviction quota keeper.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::holder::{HolderSummary, MultiSourcedHolder, SourcedCopy};
use crate::instance::InstanceInfo;
use crate::notification::ChangeNotification;
use crate::source::Source;

pub struct DataStore {
    holders: DashMap<String, MultiSourcedHolder>,
    size_tx: watch::Sender<usize>,
}

impl DataStore {
    #[must_use]
    pub fn new() -> Self {
        let (size_tx, _) = watch::channel(0);
        Self { holders: DashMap::new(), size_tx }
    }

    /// Number of distinct instance ids (not copies).
    #[must_use]
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Size feed; a new value is published only when the size changes.
    pub fn size_receiver(&self) -> watch::Receiver<usize> {
        self.size_tx.subscribe()
    }

    pub fn update(&self, source: Source, info: Arc<InstanceInfo>) -> Vec<ChangeNotification> {
        let notes = {
            let mut holder = self
                .holders
                .entry(info.id.clone())
                .or_insert_with(|| MultiSourcedHolder::new(info.id.clone()));
            holder.update(source, info)
        };
        self.publish_size();
        notes
    }

    pub fn remove(&self, id: &str, source: &Source) -> Vec<ChangeNotification> {
        let notes = match self.holders.get_mut(id) {
            Some(mut holder) => holder.remove(source),
            None => return Vec::new(),
        };
        self.holders.remove_if(id, |_, holder| holder.is_empty());
        self.publish_size();
        notes
    }

    pub fn snapshot_of(&self, id: &str) -> Option<SourcedCopy> {
        self.holders.get(id).and_then(|h| h.snapshot().cloned())
    }

    /// Current snapshot copy of every holder.
    pub fn snapshots(&self) -> Vec<SourcedCopy> {
        self.holders
            .iter()
            .filter_map(|entry| entry.value().snapshot().cloned())
            .collect()
    }

    /// Copies held by exactly `source` (same connection id).
    pub fn copies_from(&self, source: &Source) -> Vec<SourcedCopy> {
        self.copies_where(|s| s == source)
    }

    pub fn copies_where<F>(&self, mut pred: F) -> Vec<SourcedCopy>
    where
        F: FnMut(&Source) -> bool,
    {
        let mut out = Vec::new();
        for entry in self.holders.iter() {
            out.extend(entry.value().copies().iter().filter(|c| pred(&c.source)).cloned());
        }
        out
    }

    /// Holder summaries ordered by id.
    pub fn summaries(&self) -> Vec<HolderSummary> {
        let mut out: Vec<HolderSummary> =
            self.holders.iter().map(|entry| entry.value().summary()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn publish_size(&self) {
        let size = self.holders.len();
        self.size_tx.send_if_modified(|current| {
            if *current == size {
                false
            } else {
                *current = size;
                true
            }
        });
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
