// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscriber-side backpressure.
//!
//! Every interest stream has a bounded live buffer. The writer never waits
//! on it: the hub measures how full the buffer is after each delivery, flags
//! slow subscribers early, and applies the configured [`OverflowPolicy`]
//! once the buffer is full.
//!
//! # Example
//!
//! ```
//! use service_registry::BackpressureLevel;
//!
//! let level = BackpressureLevel::from_occupancy(100, 1024);
//! assert_eq!(level, BackpressureLevel::Normal);
//!
//! let level = BackpressureLevel::from_occupancy(800, 1024);
//! assert_eq!(level, BackpressureLevel::Warn);
//! assert!(level.is_slow());
//!
//! let level = BackpressureLevel::from_occupancy(1024, 1024);
//! assert_eq!(level, BackpressureLevel::Full);
//! assert!(!level.can_accept());
//! ```

use serde::Deserialize;

/// How full a subscriber's live buffer is.
///
/// - **Normal** (< 70%): keeping up
/// - **Warn** (70-90%): falling behind, logged once
/// - **Critical** (90-100%): about to overflow
/// - **Full** (100%): next notification triggers the overflow policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackpressureLevel {
    Normal = 0,
    Warn = 1,
    Critical = 2,
    Full = 3,
}

impl BackpressureLevel {
    /// Level from a fill ratio (0.0 → 1.0)
    #[must_use]
    pub fn from_fill(fill: f64) -> Self {
        match fill {
            p if p < 0.70 => Self::Normal,
            p if p < 0.90 => Self::Warn,
            p if p < 1.0 => Self::Critical,
            _ => Self::Full,
        }
    }

    #[must_use]
    pub fn from_occupancy(used: usize, capacity: usize) -> Self {
        if capacity == 0 {
            return Self::Full;
        }
        Self::from_fill(used as f64 / capacity as f64)
    }

    /// Subscriber is falling behind the writer.
    #[must_use]
    pub fn is_slow(&self) -> bool {
        *self >= Self::Warn
    }

    #[must_use]
    pub fn can_accept(&self) -> bool {
        *self < Self::Full
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal - subscriber keeping up",
            Self::Warn => "Warning - subscriber falling behind",
            Self::Critical => "Critical - subscriber buffer nearly full",
            Self::Full => "Full - overflow policy applies",
        }
    }
}

impl std::fmt::Display for BackpressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What happens when a live notification meets a full subscriber buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// End the stream with `Lagged`; the subscriber must resubscribe to
    /// rebuild a consistent view.
    #[default]
    Disconnect,
    /// Discard the notification and keep the stream open. The subscriber's
    /// view may drift; the skipped count is reported as lag.
    DropNewest,
}

impl OverflowPolicy {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect lagging subscriber",
            Self::DropNewest => "drop newest notification",
        }
    }
}
