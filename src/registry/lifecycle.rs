// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Registry lifecycle: start and shutdown.

use std::sync::atomic::Ordering;

use tokio::sync::oneshot;
use tracing::{debug, info};

use super::actor::Command;
use super::{Registry, RegistryState};
use crate::metrics;

impl Registry {
    /// Spawn the writer task. Must be called from within a tokio runtime;
    /// calling it again, or after shutdown, does nothing.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) {
        let Some(actor) = self.pending_actor.lock().take() else {
            debug!("Registry already started");
            return;
        };
        info!(
            allowed_percentage_drop = self.config.eviction_allowed_percentage_drop,
            lease_ms = self.config.lease_duration_ms,
            "Starting registry"
        );
        let handle = tokio::spawn(actor.run());
        *self.actor_task.lock() = Some(handle);
        self.set_state(RegistryState::Running);
    }

    /// Complete every interest stream, release all ingestion sources and
    /// stop the writer.
    ///
    /// Idempotent: later calls return immediately. Subscriptions requested
    /// during or after shutdown receive an already-completed stream.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            debug!("Registry shutdown already in progress");
            return;
        }
        let shutdown_start = std::time::Instant::now();
        info!("Initiating registry shutdown...");

        // Never started: no writer to stop.
        if self.pending_actor.lock().take().is_some() {
            self.set_state(RegistryState::ShuttingDown);
            self.hub.shutdown();
            self.set_state(RegistryState::Stopped);
            info!("Registry shutdown complete (never started)");
            return;
        }

        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
        let handle = self.actor_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        // Writer gone by any path: make sure nothing outlives it.
        self.hub.shutdown();
        for (_, binding) in self.bindings.lock().drain() {
            binding.release();
        }

        self.set_state(RegistryState::Stopped);
        metrics::record_command_latency("shutdown", shutdown_start.elapsed());
        info!("Registry shutdown complete");
    }

    pub(super) fn set_state(&self, state: RegistryState) {
        self.state.send_replace(state);
        metrics::set_registry_state(&state.to_string());
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Some(handle) = self.actor_task.lock().take() {
            handle.abort();
        }
        for (_, binding) in self.bindings.lock().drain() {
            binding.release();
        }
        self.hub.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::instance::InstanceInfo;
    use crate::interest::Interest;
    use crate::source::Source;

    #[tokio::test]
    async fn test_start_sets_running() {
        let registry = Registry::new(RegistryConfig::default());
        assert_eq!(registry.state(), RegistryState::Created);
        registry.start();
        assert_eq!(registry.state(), RegistryState::Running);
        registry.start();
        assert!(registry.is_running());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let registry = Registry::new(RegistryConfig::default());
        registry.start();
        registry.shutdown().await;
        assert_eq!(registry.state(), RegistryState::Stopped);
        registry.shutdown().await;
        assert_eq!(registry.state(), RegistryState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let registry = Registry::new(RegistryConfig::default());
        registry.shutdown().await;
        assert_eq!(registry.state(), RegistryState::Stopped);

        // Starting afterwards is a no-op.
        registry.start();
        assert_eq!(registry.state(), RegistryState::Stopped);

        let mut stream = registry.for_interest(Interest::FullRegistry, None).await;
        assert!(stream.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_state_receiver_sees_transitions() {
        let registry = Registry::new(RegistryConfig::default());
        let mut rx = registry.state_receiver();
        registry.start();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), RegistryState::Running);

        registry.shutdown().await;
        assert_eq!(*rx.borrow_and_update(), RegistryState::Stopped);
    }

    #[tokio::test]
    async fn test_drop_without_shutdown() {
        let registry = Registry::new(RegistryConfig::default());
        registry.start();
        registry
            .register(&Source::local("c"), InstanceInfo::new("a", "app"))
            .await
            .unwrap();
        drop(registry);
    }
}
