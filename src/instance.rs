// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Instance data model.
//!
//! An [`InstanceInfo`] is an immutable value describing one addressable unit
//! of an application. Updates build a new value (via the `with_*` setters)
//! rather than mutating a shared one; the registry stores them behind `Arc`.
//!
//! # Example
//!
//! ```
//! use service_registry::{InstanceInfo, InstanceStatus};
//!
//! let info = InstanceInfo::new("i-001", "billing")
//!     .with_hostname("billing-1.internal")
//!     .with_vip("billing.vip")
//!     .with_status(InstanceStatus::Up);
//!
//! assert_eq!(info.status, InstanceStatus::Up);
//! assert!(info.validate().is_ok());
//!
//! let down = info.clone().with_status(InstanceStatus::Down);
//! assert_ne!(info, down);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Lifecycle status reported by an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Starting,
    Up,
    Down,
    OutOfService,
    #[default]
    Unknown,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "STARTING"),
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::OutOfService => write!(f, "OUT_OF_SERVICE"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A named network port exposed by an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
}

impl ServicePort {
    pub fn new(port: u16) -> Self {
        Self { name: None, port, secure: false }
    }

    pub fn secure(port: u16) -> Self {
        Self { name: None, port, secure: true }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Everything the registry knows about one instance.
///
/// Equality is full field equality; the registry relies on it to detect
/// no-op updates, so `last_modified` participates too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Unique instance id (the DataStore key)
    pub id: String,
    /// Application name
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_group: Option<String>,
    /// Auto-scaling group name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_vip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub status: InstanceStatus,
    /// Free-form metadata (ordered so equality and serialization are stable)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Last modification timestamp (epoch millis)
    #[serde(default)]
    pub last_modified: i64,
}

impl InstanceInfo {
    /// Create an instance with the given identity, status `Unknown` and
    /// `last_modified` set to now.
    pub fn new(id: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            app: app.into(),
            app_group: None,
            asg: None,
            vip_address: None,
            secure_vip_address: None,
            hostname: None,
            ip_address: None,
            ports: Vec::new(),
            status: InstanceStatus::Unknown,
            metadata: BTreeMap::new(),
            last_modified: now_millis(),
        }
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_app_group(mut self, group: impl Into<String>) -> Self {
        self.app_group = Some(group.into());
        self
    }

    pub fn with_asg(mut self, asg: impl Into<String>) -> Self {
        self.asg = Some(asg.into());
        self
    }

    pub fn with_vip(mut self, vip: impl Into<String>) -> Self {
        self.vip_address = Some(vip.into());
        self
    }

    pub fn with_secure_vip(mut self, vip: impl Into<String>) -> Self {
        self.secure_vip_address = Some(vip.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_port(mut self, port: ServicePort) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_last_modified(mut self, millis: i64) -> Self {
        self.last_modified = millis;
        self
    }

    /// Same value with `last_modified` bumped to now.
    pub fn touched(self) -> Self {
        let now = now_millis();
        self.with_last_modified(now)
    }

    /// Reject values that must never reach the DataStore.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::malformed("empty instance id"));
        }
        if self.app.trim().is_empty() {
            return Err(RegistryError::malformed(format!(
                "instance {} has an empty application name",
                self.id
            )));
        }
        Ok(())
    }

    /// Names of the fields that differ from `older`, for debug logging of
    /// Modify decisions.
    pub fn changed_fields(&self, older: &InstanceInfo) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.app != older.app {
            changed.push("app");
        }
        if self.app_group != older.app_group {
            changed.push("app_group");
        }
        if self.asg != older.asg {
            changed.push("asg");
        }
        if self.vip_address != older.vip_address {
            changed.push("vip_address");
        }
        if self.secure_vip_address != older.secure_vip_address {
            changed.push("secure_vip_address");
        }
        if self.hostname != older.hostname {
            changed.push("hostname");
        }
        if self.ip_address != older.ip_address {
            changed.push("ip_address");
        }
        if self.ports != older.ports {
            changed.push("ports");
        }
        if self.status != older.status {
            changed.push("status");
        }
        if self.metadata != older.metadata {
            changed.push("metadata");
        }
        if self.last_modified != older.last_modified {
            changed.push("last_modified");
        }
        changed
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
