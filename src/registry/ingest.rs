// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source ingestion: binding update streams to the writer.
//!
//! Each connected source gets one ingestion task that forwards its events to
//! the writer in stream order, plus an optional lease. How the stream ends
//! decides what happens to the source's entries:
//!
//! ```text
//! stream ends ──► Completed ──► remove immediately
//! stream error ─► Failed ─────► eviction queue (quota)
//! no renewal ───► LeaseExpired ► eviction queue (quota)
//! reconnect ────► Superseded ──► parked until the new connection catches up
//! ```
//!
//! A superseded connection's entries are parked: re-registrations from the
//! new connection reclaim them silently. The rest move to the eviction queue
//! when the new connection sends `BufferEnd`, ends, or has not caught up
//! within [`RegistryConfig::reconnect_grace`](crate::RegistryConfig::reconnect_grace).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::actor::{Binding, Command};
use super::types::StreamEnd;
use super::{ConnectOptions, RegistrationEvent, Registry};
use crate::error::{RegistryError, SourceError};
use crate::lease::LeaseTimer;
use crate::metrics;
use crate::source::Source;

impl Registry {
    /// Bind `updates` as the ingestion stream of `source`.
    ///
    /// If another connection of the same logical source (origin and name) is
    /// live, it is superseded: its task stops and its entries are held for
    /// the new connection to re-register. Entries it does not re-register are
    /// evicted under the quota.
    #[tracing::instrument(skip(self, updates, options), fields(source = %source))]
    pub async fn connect<S>(
        &self,
        source: Source,
        updates: S,
        options: ConnectOptions,
    ) -> Result<SourceConnection, RegistryError>
    where
        S: Stream<Item = Result<RegistrationEvent, SourceError>> + Send + 'static,
    {
        if self.shutdown_started.load(Ordering::Acquire) || self.commands.is_closed() {
            return Err(RegistryError::Closed);
        }

        let key = source.logical_key();
        let previous = self.bindings.lock().remove(&key);
        if let Some(previous) = previous {
            self.supersede(previous).await?;
        }

        let lease = options.lease.map(|duration| {
            let commands = self.commands.clone();
            let expired = source.clone();
            Arc::new(LeaseTimer::spawn(duration, move || async move {
                let _ = commands
                    .send(Command::SourceEnded { source: expired, end: StreamEnd::LeaseExpired })
                    .await;
            }))
        });

        // Bind under the lock so an immediately-ending stream cannot reach
        // the writer before its binding exists.
        let (ingest, displaced) = {
            let mut bindings = self.bindings.lock();
            let task = tokio::spawn(run_ingest(
                source.clone(),
                updates,
                lease.clone(),
                self.commands.clone(),
            ));
            let ingest = task.abort_handle();
            let displaced = bindings.insert(
                key,
                Binding { source: source.clone(), ingest: ingest.clone(), lease: lease.clone() },
            );
            (ingest, displaced)
        };
        if let Some(displaced) = displaced {
            self.supersede(displaced).await?;
        }

        info!(lease = ?options.lease, "Source connected");
        Ok(SourceConnection { source, lease, ingest, commands: self.commands.clone() })
    }

    async fn supersede(&self, previous: Binding) -> Result<(), RegistryError> {
        previous.release();
        debug!(old = %previous.source, "Superseding previous connection");
        let source = previous.source;
        self.send(Command::SourceEnded { source: source.clone(), end: StreamEnd::Superseded })
            .await?;

        let grace = self.config.reconnect_grace();
        let commands = self.commands.downgrade();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::ReleaseSuperseded { source }).await;
            }
        });
        Ok(())
    }
}

async fn run_ingest<S>(
    source: Source,
    updates: S,
    lease: Option<Arc<LeaseTimer>>,
    commands: mpsc::Sender<Command>,
) where
    S: Stream<Item = Result<RegistrationEvent, SourceError>> + Send + 'static,
{
    let mut updates = Box::pin(updates);
    let end = loop {
        let event = match updates.next().await {
            Some(Ok(event)) => event,
            Some(Err(err)) => break StreamEnd::Failed(err),
            None => break StreamEnd::Completed,
        };
        if let Some(lease) = &lease {
            lease.renew();
        }
        let command = match event {
            RegistrationEvent::Register(info) => {
                if let Err(e) = info.validate() {
                    metrics::record_malformed_update(source.origin);
                    warn!(source = %source, error = %e, "Dropping malformed registration");
                    continue;
                }
                Command::Register { source: source.clone(), info: Arc::new(info), ack: None }
            }
            RegistrationEvent::Unregister(id) => {
                if id.trim().is_empty() {
                    metrics::record_malformed_update(source.origin);
                    warn!(source = %source, "Dropping unregistration with empty id");
                    continue;
                }
                Command::Unregister { source: source.clone(), id, ack: None }
            }
            RegistrationEvent::Buffer(state) => Command::Buffer { source: source.clone(), state },
        };
        if commands.send(command).await.is_err() {
            debug!(source = %source, "Registry closed; stopping ingestion");
            return;
        }
    };
    debug!(source = %source, end = end.as_str(), "Ingestion stream ended");
    let _ = commands.send(Command::SourceEnded { source, end }).await;
}

/// Handle to a connected source.
///
/// Dropping the handle leaves the source connected; use
/// [`SourceConnection::close`] to end it gracefully.
pub struct SourceConnection {
    source: Source,
    lease: Option<Arc<LeaseTimer>>,
    ingest: AbortHandle,
    commands: mpsc::Sender<Command>,
}

impl SourceConnection {
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Heartbeat: push the lease deadline forward. Returns `false` if the
    /// source has no lease or the lease already expired.
    pub fn renew(&self) -> bool {
        match &self.lease {
            Some(lease) if !lease.is_finished() => {
                lease.renew();
                true
            }
            _ => false,
        }
    }

    /// The ingestion task is still consuming the stream.
    pub fn is_active(&self) -> bool {
        !self.ingest.is_finished()
    }

    /// Stop ingesting and remove the source's entries immediately, as if
    /// its stream had completed.
    pub async fn close(self) {
        self.ingest.abort();
        if let Some(lease) = &self.lease {
            lease.cancel();
        }
        let _ = self
            .commands
            .send(Command::SourceEnded { source: self.source, end: StreamEnd::Completed })
            .await;
    }
}

impl std::fmt::Debug for SourceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConnection")
            .field("source", &self.source)
            .field("leased", &self.lease.is_some())
            .field("active", &self.is_active())
            .finish()
    }
}
