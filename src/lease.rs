// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-source lease timers.
//!
//! A lease is a cancellable deadline on the tokio timer. Renewing moves the
//! deadline forward; letting it pass runs the expiry action once. The
//! registry's expiry action ends the source's stream through the eviction
//! path, never by removing entries directly.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

pub struct LeaseTimer {
    duration: Duration,
    deadline: watch::Sender<Instant>,
    task: JoinHandle<()>,
}

impl LeaseTimer {
    /// Start a lease of `duration`; `on_expire` runs if it is not renewed
    /// in time. Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(duration: Duration, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (deadline, mut rx) = watch::channel(Instant::now() + duration);
        let task = tokio::spawn(async move {
            loop {
                let at = *rx.borrow_and_update();
                tokio::select! {
                    _ = sleep_until(at) => {
                        // A renewal that raced the timer wins.
                        if rx.has_changed().unwrap_or(false) {
                            continue;
                        }
                        debug!(?duration, "Lease expired");
                        on_expire().await;
                        return;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Self { duration, deadline, task }
    }

    /// Push the deadline to `now + duration`.
    pub fn renew(&self) {
        self.deadline.send_replace(Instant::now() + self.duration);
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.borrow()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Stop the timer without running the expiry action.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Expired, or cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LeaseTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
