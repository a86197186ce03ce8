// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-instance reconciliation of copies arriving from several sources.
//!
//! # Snapshot selection
//!
//! ```text
//! copies (first-insertion order)        snapshot
//! ┌──────────────────────────────┐
//! │ replicated:peer-1   (Down)   │
//! │ local:conn-1        (Up)     │ ───► local copy wins
//! │ replicated:peer-2   (Up)     │
//! └──────────────────────────────┘
//!
//! no local copy ──► earliest inserted replica wins
//! ```
//!
//! Every mutation returns the notifications a subscriber needs in order to
//! keep an accurate picture of the snapshot. Writes to a copy that is not
//! the snapshot are invisible until that copy is promoted.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::instance::InstanceInfo;
use crate::notification::ChangeNotification;
use crate::source::Source;

/// One source's copy of an instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedCopy {
    pub source: Source,
    pub info: Arc<InstanceInfo>,
}

/// Diagnostic view of a holder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HolderSummary {
    pub id: String,
    pub snapshot_source: Option<Source>,
    pub sources: Vec<Source>,
}

/// All copies of one instance id, plus the promoted snapshot.
#[derive(Debug, Clone)]
pub struct MultiSourcedHolder {
    id: String,
    copies: Vec<SourcedCopy>,
    snapshot: Option<SourcedCopy>,
}

impl MultiSourcedHolder {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), copies: Vec::new(), snapshot: None }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Option<&SourcedCopy> {
        self.snapshot.as_ref()
    }

    /// The copy held for exactly `source` (same connection id).
    pub fn get(&self, source: &Source) -> Option<&Arc<InstanceInfo>> {
        self.copies.iter().find(|c| c.source == *source).map(|c| &c.info)
    }

    pub fn copies(&self) -> &[SourcedCopy] {
        &self.copies
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.copies.iter().map(|c| &c.source)
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    pub fn summary(&self) -> HolderSummary {
        HolderSummary {
            id: self.id.clone(),
            snapshot_source: self.snapshot.as_ref().map(|s| s.source.clone()),
            sources: self.sources().cloned().collect(),
        }
    }

    fn is_snapshot(&self, source: &Source) -> bool {
        self.snapshot.as_ref().is_some_and(|s| s.source.is_same_logical(source))
    }

    /// Store `info` as `source`'s copy and return what subscribers must see.
    pub fn update(&mut self, source: Source, info: Arc<InstanceInfo>) -> Vec<ChangeNotification> {
        let copy = SourcedCopy { source: source.clone(), info: Arc::clone(&info) };

        if let Some(pos) = self.copies.iter().position(|c| c.source.is_same_logical(&source)) {
            let was_snapshot = self.is_snapshot(&source);
            let old = std::mem::replace(&mut self.copies[pos], copy.clone());

            if !was_snapshot {
                debug!(id = %self.id, source = %source, "Update to non-snapshot copy");
                return Vec::new();
            }

            // Keep the snapshot's source id current even when the value is unchanged.
            self.snapshot = Some(copy);
            if *old.info == *info {
                debug!(id = %self.id, source = %source, "No-op update");
                return Vec::new();
            }
            debug!(
                id = %self.id,
                changed = ?info.changed_fields(&old.info),
                "Snapshot modified"
            );
            return vec![ChangeNotification::modify(info, source)];
        }

        self.copies.push(copy.clone());
        match &self.snapshot {
            None => {
                self.snapshot = Some(copy);
                vec![ChangeNotification::add(info, source)]
            }
            Some(current) if !current.source.is_local() && source.is_local() => {
                debug!(
                    id = %self.id,
                    from = %current.source,
                    to = %source,
                    "Local copy supersedes snapshot"
                );
                self.snapshot = Some(copy);
                vec![ChangeNotification::add(info, source)]
            }
            Some(_) => {
                debug!(id = %self.id, source = %source, "New non-snapshot copy");
                Vec::new()
            }
        }
    }

    /// Drop `source`'s copy and return what subscribers must see.
    ///
    /// Removing a copy held by a different connection of the same logical
    /// source, or one that was never stored, does nothing.
    pub fn remove(&mut self, source: &Source) -> Vec<ChangeNotification> {
        let Some(pos) = self.copies.iter().position(|c| c.source.is_same_logical(source)) else {
            return Vec::new();
        };
        if self.copies[pos].source.id != source.id {
            debug!(
                id = %self.id,
                stale = %source,
                held = %self.copies[pos].source,
                "Ignoring removal from stale source id"
            );
            return Vec::new();
        }

        let was_snapshot = self.is_snapshot(source);
        let removed = self.copies.remove(pos);

        if self.copies.is_empty() {
            self.snapshot = None;
            return vec![ChangeNotification::delete(removed.info, removed.source)];
        }
        if !was_snapshot {
            return Vec::new();
        }

        let next = self
            .copies
            .iter()
            .find(|c| c.source.is_local())
            .or_else(|| self.copies.first())
            .cloned();
        let Some(next) = next else {
            return vec![ChangeNotification::delete(removed.info, removed.source)];
        };
        debug!(id = %self.id, from = %removed.source, to = %next.source, "Snapshot handover");
        self.snapshot = Some(next.clone());
        vec![
            ChangeNotification::delete(removed.info, removed.source),
            ChangeNotification::add(next.info, next.source),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceStatus;
    use crate::notification::ChangeKind;

    fn info(status: InstanceStatus) -> Arc<InstanceInfo> {
        Arc::new(InstanceInfo::new("x", "app").with_status(status).with_last_modified(1))
    }

    fn kinds(notes: &[ChangeNotification]) -> Vec<(ChangeKind, InstanceStatus)> {
        notes
            .iter()
            .map(|n| (n.kind().unwrap(), n.info().unwrap().status))
            .collect()
    }

    #[test]
    fn test_first_copy_is_added() {
        let mut h = MultiSourcedHolder::new("x");
        let notes = h.update(Source::replicated("p1"), info(InstanceStatus::Up));
        assert_eq!(kinds(&notes), vec![(ChangeKind::Add, InstanceStatus::Up)]);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_local_then_replica_then_handover() {
        let local = Source::local("conn1");
        let peer = Source::replicated("peer1");
        let mut h = MultiSourcedHolder::new("x");

        let n = h.update(local.clone(), info(InstanceStatus::Up));
        assert_eq!(kinds(&n), vec![(ChangeKind::Add, InstanceStatus::Up)]);

        let n = h.update(peer.clone(), info(InstanceStatus::Down));
        assert!(n.is_empty());

        let n = h.remove(&local);
        assert_eq!(
            kinds(&n),
            vec![(ChangeKind::Delete, InstanceStatus::Up), (ChangeKind::Add, InstanceStatus::Down)]
        );

        let n = h.remove(&peer);
        assert_eq!(kinds(&n), vec![(ChangeKind::Delete, InstanceStatus::Down)]);
        assert!(h.is_empty());
        assert!(h.snapshot().is_none());
    }

    #[test]
    fn test_identical_update_is_noop() {
        let src = Source::local("c");
        let mut h = MultiSourcedHolder::new("x");
        assert_eq!(h.update(src.clone(), info(InstanceStatus::Up)).len(), 1);
        assert!(h.update(src, info(InstanceStatus::Up)).is_empty());
    }

    #[test]
    fn test_snapshot_change_is_modify() {
        let src = Source::local("c");
        let mut h = MultiSourcedHolder::new("x");
        h.update(src.clone(), info(InstanceStatus::Up));
        let n = h.update(src, info(InstanceStatus::Down));
        assert_eq!(kinds(&n), vec![(ChangeKind::Modify, InstanceStatus::Down)]);
    }

    #[test]
    fn test_local_supersedes_replica() {
        let mut h = MultiSourcedHolder::new("x");
        h.update(Source::replicated("p1"), info(InstanceStatus::Down));
        let local = Source::local("c");
        let n = h.update(local.clone(), info(InstanceStatus::Up));
        assert_eq!(kinds(&n), vec![(ChangeKind::Add, InstanceStatus::Up)]);
        assert_eq!(h.snapshot().map(|s| &s.source), Some(&local));
    }

    #[test]
    fn test_earliest_replica_wins_and_fifo_after_handover() {
        let p1 = Source::replicated("p1");
        let p2 = Source::replicated("p2");
        let p3 = Source::replicated("p3");
        let mut h = MultiSourcedHolder::new("x");
        h.update(p1.clone(), info(InstanceStatus::Up));
        assert!(h.update(p2.clone(), info(InstanceStatus::Down)).is_empty());
        assert!(h.update(p3.clone(), info(InstanceStatus::Starting)).is_empty());
        assert_eq!(h.snapshot().map(|s| &s.source), Some(&p1));

        let n = h.remove(&p1);
        assert_eq!(n.len(), 2);
        assert_eq!(h.snapshot().map(|s| &s.source), Some(&p2));
    }

    #[test]
    fn test_handover_prefers_local() {
        let p1 = Source::replicated("p1");
        let mut h = MultiSourcedHolder::new("x");
        h.update(p1.clone(), info(InstanceStatus::Up));
        h.update(Source::replicated("p2"), info(InstanceStatus::Down));
        let local = Source::local("c");
        h.update(local.clone(), info(InstanceStatus::Starting));
        let other_local = Source::local("d");
        h.update(other_local, info(InstanceStatus::OutOfService));

        let n = h.remove(&local);
        assert_eq!(
            kinds(&n),
            vec![
                (ChangeKind::Delete, InstanceStatus::Starting),
                (ChangeKind::Add, InstanceStatus::OutOfService)
            ]
        );
    }

    #[test]
    fn test_non_snapshot_removal_is_silent() {
        let mut h = MultiSourcedHolder::new("x");
        h.update(Source::local("c"), info(InstanceStatus::Up));
        let peer = Source::replicated("p");
        h.update(peer.clone(), info(InstanceStatus::Down));
        assert!(h.remove(&peer).is_empty());
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_unknown_source_removal_is_noop() {
        let mut h = MultiSourcedHolder::new("x");
        h.update(Source::local("c"), info(InstanceStatus::Up));
        assert!(h.remove(&Source::replicated("never")).is_empty());
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_reconnect_overwrites_logical_source() {
        let first = Source::replicated("p");
        let mut h = MultiSourcedHolder::new("x");
        h.update(first.clone(), info(InstanceStatus::Up));

        let second = first.reconnect();
        let n = h.update(second.clone(), info(InstanceStatus::Up));
        assert!(n.is_empty());
        assert_eq!(h.len(), 1);
        assert!(h.get(&second).is_some());
        assert!(h.get(&first).is_none());

        // The previous generation can no longer remove the copy.
        assert!(h.remove(&first).is_empty());
        assert_eq!(h.len(), 1);
        assert_eq!(h.snapshot().map(|s| &s.source), Some(&second));

        let n = h.remove(&second);
        assert_eq!(kinds(&n), vec![(ChangeKind::Delete, InstanceStatus::Up)]);
    }

    #[test]
    fn test_summary() {
        let local = Source::local("c");
        let peer = Source::replicated("p");
        let mut h = MultiSourcedHolder::new("x");
        h.update(peer.clone(), info(InstanceStatus::Up));
        h.update(local.clone(), info(InstanceStatus::Up));

        let s = h.summary();
        assert_eq!(s.id, "x");
        assert_eq!(s.snapshot_source, Some(local.clone()));
        assert_eq!(s.sources, vec![peer, local]);
    }
}
