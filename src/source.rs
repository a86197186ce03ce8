// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Where a copy of an instance came from.
//!
//! A [`Source`] is an origin, an optional name and a locally generated id.
//! Origin and name together form the *logical* source; the id separates
//! reconnects of the same logical source so that a late removal from an old
//! connection cannot clobber state written by the new one.
//!
//! ```
//! use service_registry::{Origin, Source, SourceMatcher};
//!
//! let first = Source::replicated("peer-1");
//! let again = first.reconnect();
//!
//! assert!(first.is_same_logical(&again));
//! assert_ne!(first, again);
//! assert!(SourceMatcher::origin(Origin::Replicated).matches(&again));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Origin of a registration copy, in reconciliation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Registered directly with this server
    Local,
    /// Replicated from a peer server
    Replicated,
    /// Learned through an interest subscription to another registry
    Interested,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Replicated => "replicated",
            Self::Interested => "interested",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin plus name: identity that survives reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub origin: Origin,
    pub name: Option<String>,
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{}", self.origin, name),
            None => write!(f, "{}", self.origin),
        }
    }
}

/// One concrete connection that delivers instance copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub origin: Origin,
    pub name: Option<String>,
    pub id: Uuid,
}

impl Source {
    pub fn new(origin: Origin, name: Option<String>) -> Self {
        Self { origin, name, id: Uuid::new_v4() }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(Origin::Local, Some(name.into()))
    }

    pub fn replicated(peer: impl Into<String>) -> Self {
        Self::new(Origin::Replicated, Some(peer.into()))
    }

    pub fn interested(name: impl Into<String>) -> Self {
        Self::new(Origin::Interested, Some(name.into()))
    }

    /// Same logical source, new connection id.
    pub fn reconnect(&self) -> Self {
        Self::new(self.origin, self.name.clone())
    }

    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }

    /// Origin and name match; the connection id is ignored.
    pub fn is_same_logical(&self, other: &Source) -> bool {
        self.origin == other.origin && self.name == other.name
    }

    pub fn logical_key(&self) -> SourceKey {
        SourceKey { origin: self.origin, name: self.name.clone() }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{}#{}", self.origin, name, self.id),
            None => write!(f, "{}#{}", self.origin, self.id),
        }
    }
}

/// Restricts which sources' copies a subscriber or snapshot query sees.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceMatcher {
    #[default]
    Any,
    Origin(Origin),
    OriginAndName(Origin, String),
}

impl SourceMatcher {
    pub fn origin(origin: Origin) -> Self {
        Self::Origin(origin)
    }

    pub fn origin_and_name(origin: Origin, name: impl Into<String>) -> Self {
        Self::OriginAndName(origin, name.into())
    }

    pub fn matches(&self, source: &Source) -> bool {
        match self {
            Self::Any => true,
            Self::Origin(origin) => source.origin == *origin,
            Self::OriginAndName(origin, name) => {
                source.origin == *origin && source.name.as_deref() == Some(name.as_str())
            }
        }
    }
}

impl fmt::Display for SourceMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Origin(origin) => write!(f, "{}", origin),
            Self::OriginAndName(origin, name) => write!(f, "{}:{}", origin, name),
        }
    }
}
