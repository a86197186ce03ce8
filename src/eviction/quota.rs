// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Eviction permit accounting.
//!
//! The keeper compares the current registry size against an *expected*
//! baseline, the high-water mark of the healthy regime. With an allowed drop
//! of `p` percent, evictions may take the registry down to
//! `expected * (100 - p) / 100` and never below one instance.
//!
//! Permits are pull-based: the writer `request`s as many as it has queued
//! items, receives what is currently allowed, and the rest is buffered as
//! pending demand that is granted on later size observations.
//!
//! # Example
//!
//! ```
//! use service_registry::eviction::is_eviction_allowed;
//!
//! // 10 expected, 20% allowed drop: the floor is 8.
//! assert!(is_eviction_allowed(9, 10, 20));
//! assert!(!is_eviction_allowed(8, 10, 20));
//!
//! // Never evict the last instance, and 0% disables eviction.
//! assert!(!is_eviction_allowed(1, 1, 100));
//! assert!(!is_eviction_allowed(10, 10, 0));
//! ```

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::metrics;

/// Whether removing one more instance keeps `current` within the allowed
/// drop from `expected`.
pub fn is_eviction_allowed(current: usize, expected: usize, allowed_percentage_drop: u8) -> bool {
    max_evictions(current, expected, allowed_percentage_drop) > 0
}

/// Largest number of removals from `current` that stays at or above the
/// floor, capped so the last instance is never evicted.
fn max_evictions(current: usize, expected: usize, allowed_percentage_drop: u8) -> usize {
    let pct = allowed_percentage_drop.min(100) as i128;
    if pct == 0 || current <= 1 {
        return 0;
    }
    let headroom = current as i128 * 100 - expected as i128 * (100 - pct);
    if headroom <= 0 {
        return 0;
    }
    let k = (headroom / 100) as usize;
    k.min(current - 1)
}

/// Grants eviction permits against the registry size feed.
pub struct EvictionQuotaKeeper {
    allowed_percentage_drop: u8,
    expected: usize,
    current: usize,
    /// Requested but not yet granted
    pending: usize,
    /// Granted but not yet consumed by a removal
    outstanding: usize,
    feed: watch::Receiver<usize>,
    feed_lost: bool,
    self_preservation: bool,
}

impl EvictionQuotaKeeper {
    pub fn new(allowed_percentage_drop: u8, mut feed: watch::Receiver<usize>) -> Self {
        let size = *feed.borrow_and_update();
        Self {
            allowed_percentage_drop: allowed_percentage_drop.min(100),
            expected: size,
            current: size,
            pending: 0,
            outstanding: 0,
            feed,
            feed_lost: false,
            self_preservation: false,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Demand not yet granted.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_feed_lost(&self) -> bool {
        self.feed_lost
    }

    /// Evictions are being held back by the quota.
    pub fn is_in_self_preservation(&self) -> bool {
        self.self_preservation
    }

    /// Permits that could be granted right now.
    pub fn allowance(&self) -> usize {
        if self.feed_lost {
            return 0;
        }
        max_evictions(self.current, self.expected, self.allowed_percentage_drop)
            .saturating_sub(self.outstanding)
    }

    /// Add `n` to the demand and return how many permits are granted now.
    pub fn request(&mut self, n: usize) -> usize {
        self.pending += n;
        self.poll_size()
    }

    /// Retract demand for `n` items cancelled before removal. Demand that
    /// was already granted is returned as unused permits.
    pub fn withdraw(&mut self, n: usize) {
        let from_pending = n.min(self.pending);
        self.pending -= from_pending;
        let rest = n - from_pending;
        self.outstanding = self.outstanding.saturating_sub(rest);
        self.update_self_preservation();
    }

    /// Record that a granted permit was used for a removal.
    pub fn consume(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// Lower the baseline for instances that left gracefully; those are
    /// not a drop the registry should preserve against.
    pub fn release_expected(&mut self, n: usize) {
        self.expected = self.expected.saturating_sub(n);
    }

    /// Pick up any new size from the feed and grant what it now allows.
    pub fn poll_size(&mut self) -> usize {
        if !self.feed_lost {
            match self.feed.has_changed() {
                Ok(true) => {
                    let size = *self.feed.borrow_and_update();
                    self.observe(size);
                }
                Ok(false) => {}
                Err(_) => {
                    self.feed_lost = true;
                    warn!(
                        pending = self.pending,
                        "Registry size feed ended; evictions disallowed until reattached"
                    );
                }
            }
        }
        self.grant()
    }

    /// Resume after the size feed was lost.
    pub fn reattach(&mut self, mut feed: watch::Receiver<usize>) -> usize {
        let size = *feed.borrow_and_update();
        self.feed = feed;
        if self.feed_lost {
            info!(size, "Registry size feed reattached");
        }
        self.feed_lost = false;
        self.observe(size);
        self.grant()
    }

    fn observe(&mut self, size: usize) {
        self.current = size;
        if size > self.expected {
            debug!(from = self.expected, to = size, "Expected registry size raised");
            self.expected = size;
        }
    }

    fn grant(&mut self) -> usize {
        let granted = self.pending.min(self.allowance());
        self.pending -= granted;
        self.outstanding += granted;
        self.update_self_preservation();
        granted
    }

    fn update_self_preservation(&mut self) {
        let active = self.pending > 0;
        if active == self.self_preservation {
            return;
        }
        self.self_preservation = active;
        metrics::set_self_preservation(active);
        if active {
            info!(
                expected = self.expected,
                current = self.current,
                pending = self.pending,
                allowed_percentage_drop = self.allowed_percentage_drop,
                "Entering self-preservation"
            );
        } else {
            info!(current = self.current, "Leaving self-preservation");
        }
    }
}
