// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change notifications delivered to interest subscribers.
//!
//! Data notifications (`Add`, `Modify`, `Delete`) carry the instance value and
//! the source of the copy that produced them. Bracket markers delimit a batch
//! the subscriber should treat as one consistent view: replayed brackets have
//! no source, live brackets carry the source that opened the batch.

use std::fmt;
use std::sync::Arc;

use crate::instance::InstanceInfo;
use crate::interest::Interest;
use crate::source::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    BufferStart,
    BufferEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeNotification {
    Add { info: Arc<InstanceInfo>, source: Source },
    Modify { info: Arc<InstanceInfo>, source: Source },
    Delete { info: Arc<InstanceInfo>, source: Source },
    BufferStart { interest: Arc<Interest>, source: Option<Source> },
    BufferEnd { interest: Arc<Interest>, source: Option<Source> },
}

impl ChangeNotification {
    pub fn add(info: impl Into<Arc<InstanceInfo>>, source: Source) -> Self {
        Self::Add { info: info.into(), source }
    }

    pub fn modify(info: impl Into<Arc<InstanceInfo>>, source: Source) -> Self {
        Self::Modify { info: info.into(), source }
    }

    pub fn delete(info: impl Into<Arc<InstanceInfo>>, source: Source) -> Self {
        Self::Delete { info: info.into(), source }
    }

    pub fn bracket(state: BufferState, interest: Arc<Interest>, source: Option<Source>) -> Self {
        match state {
            BufferState::BufferStart => Self::BufferStart { interest, source },
            BufferState::BufferEnd => Self::BufferEnd { interest, source },
        }
    }

    /// `None` for bracket markers.
    pub fn kind(&self) -> Option<ChangeKind> {
        match self {
            Self::Add { .. } => Some(ChangeKind::Add),
            Self::Modify { .. } => Some(ChangeKind::Modify),
            Self::Delete { .. } => Some(ChangeKind::Delete),
            _ => None,
        }
    }

    pub fn info(&self) -> Option<&Arc<InstanceInfo>> {
        match self {
            Self::Add { info, .. } | Self::Modify { info, .. } | Self::Delete { info, .. } => {
                Some(info)
            }
            _ => None,
        }
    }

    pub fn source(&self) -> Option<&Source> {
        match self {
            Self::Add { source, .. } | Self::Modify { source, .. } | Self::Delete { source, .. } => {
                Some(source)
            }
            Self::BufferStart { source, .. } | Self::BufferEnd { source, .. } => source.as_ref(),
        }
    }

    pub fn is_data(&self) -> bool {
        self.kind().is_some()
    }

    pub fn buffer_state(&self) -> Option<BufferState> {
        match self {
            Self::BufferStart { .. } => Some(BufferState::BufferStart),
            Self::BufferEnd { .. } => Some(BufferState::BufferEnd),
            _ => None,
        }
    }

    /// Same bracket, re-addressed to `interest`. Data notifications are
    /// returned unchanged.
    pub(crate) fn with_interest(&self, interest: &Arc<Interest>) -> Self {
        match self {
            Self::BufferStart { source, .. } => {
                Self::BufferStart { interest: Arc::clone(interest), source: source.clone() }
            }
            Self::BufferEnd { source, .. } => {
                Self::BufferEnd { interest: Arc::clone(interest), source: source.clone() }
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for ChangeNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { info, .. } => write!(f, "Add({}, {})", info.id, info.status),
            Self::Modify { info, .. } => write!(f, "Modify({}, {})", info.id, info.status),
            Self::Delete { info, .. } => write!(f, "Delete({}, {})", info.id, info.status),
            Self::BufferStart { .. } => write!(f, "BufferStart"),
            Self::BufferEnd { .. } => write!(f, "BufferEnd"),
        }
    }
}
