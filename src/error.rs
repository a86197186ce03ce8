// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types crossing the registry boundary.
//!
//! Only malformed input is reported synchronously. Stream termination,
//! quota denial and subscriber lag are absorbed into registry state and
//! surface through notification streams and metrics instead.

use thiserror::Error;

/// Errors returned to callers of the ingestion API.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The update was rejected at the ingestion boundary and never reached
    /// the data store.
    #[error("malformed update: {reason}")]
    Malformed { reason: String },

    /// An interest pattern did not compile.
    #[error("invalid interest pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The registry has shut down; the operation was not applied.
    #[error("registry is closed")]
    Closed,
}

impl RegistryError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }
}

/// Failure carried by a source's ingestion stream.
///
/// Receiving one terminates the stream as an error; the entries held by
/// that source are queued for quota-governed eviction rather than removed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("peer disconnected")]
    Disconnected,
}
