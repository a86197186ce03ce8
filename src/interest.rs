// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Declarative subscription filters.
//!
//! An [`Interest`] selects a subset of the registry by instance attributes.
//! Attribute matchers compare either by equality or by a regular expression
//! (`Operator::Like`); patterns are compiled once when the interest is built.
//!
//! ```
//! use service_registry::{Interest, InstanceInfo};
//!
//! let billing = Interest::application("billing");
//! let any_batch = Interest::application_like("batch-.*").unwrap();
//! let either = Interest::multiple(vec![billing.clone(), any_batch]);
//!
//! assert!(either.matches(&InstanceInfo::new("i-1", "billing")));
//! assert!(either.matches(&InstanceInfo::new("i-2", "batch-nightly")));
//! assert!(!billing.matches(&InstanceInfo::new("i-3", "search")));
//! ```

use std::fmt;

use regex::Regex;

use crate::error::RegistryError;
use crate::instance::InstanceInfo;

/// How an attribute matcher compares values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    /// Whole-value regular expression match
    Like,
}

/// A single attribute comparison.
#[derive(Debug, Clone)]
pub struct ValueMatcher {
    value: String,
    operator: Operator,
    pattern: Option<Regex>,
}

impl ValueMatcher {
    pub fn equals(value: impl Into<String>) -> Self {
        Self { value: value.into(), operator: Operator::Equals, pattern: None }
    }

    /// Compile `pattern`, anchored so it must match the whole value.
    pub fn like(pattern: impl Into<String>) -> Result<Self, RegistryError> {
        let value = pattern.into();
        let compiled = Regex::new(&format!("^(?:{})$", value))?;
        Ok(Self { value, operator: Operator::Like, pattern: Some(compiled) })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match (&self.operator, &self.pattern) {
            (Operator::Like, Some(re)) => re.is_match(candidate),
            _ => self.value == candidate,
        }
    }

    fn matches_opt(&self, candidate: Option<&str>) -> bool {
        candidate.is_some_and(|c| self.matches(c))
    }
}

impl PartialEq for ValueMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.operator == other.operator && self.value == other.value
    }
}

impl Eq for ValueMatcher {}

impl fmt::Display for ValueMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Equals => write!(f, "={}", self.value),
            Operator::Like => write!(f, "~{}", self.value),
        }
    }
}

/// Subscription filter over the instance set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Matches nothing
    Empty,
    /// Matches every instance
    FullRegistry,
    Application(ValueMatcher),
    Vip(ValueMatcher),
    SecureVip(ValueMatcher),
    Instance(ValueMatcher),
    /// Union of the contained interests
    Multiple(Vec<Interest>),
}

impl Interest {
    pub fn full_registry() -> Self {
        Self::FullRegistry
    }

    pub fn application(name: impl Into<String>) -> Self {
        Self::Application(ValueMatcher::equals(name))
    }

    pub fn application_like(pattern: impl Into<String>) -> Result<Self, RegistryError> {
        Ok(Self::Application(ValueMatcher::like(pattern)?))
    }

    pub fn vip(vip: impl Into<String>) -> Self {
        Self::Vip(ValueMatcher::equals(vip))
    }

    pub fn vip_like(pattern: impl Into<String>) -> Result<Self, RegistryError> {
        Ok(Self::Vip(ValueMatcher::like(pattern)?))
    }

    pub fn secure_vip(vip: impl Into<String>) -> Self {
        Self::SecureVip(ValueMatcher::equals(vip))
    }

    pub fn instance(id: impl Into<String>) -> Self {
        Self::Instance(ValueMatcher::equals(id))
    }

    pub fn instance_like(pattern: impl Into<String>) -> Result<Self, RegistryError> {
        Ok(Self::Instance(ValueMatcher::like(pattern)?))
    }

    /// Union of `interests`. Nested unions are flattened and a single
    /// member collapses to itself.
    pub fn multiple(interests: Vec<Interest>) -> Self {
        let mut flat = Vec::with_capacity(interests.len());
        for interest in interests {
            match interest {
                Self::Multiple(inner) => flat.extend(inner),
                Self::Empty => {}
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::Empty,
            1 => flat.remove(0),
            _ => Self::Multiple(flat),
        }
    }

    pub fn matches(&self, info: &InstanceInfo) -> bool {
        match self {
            Self::Empty => false,
            Self::FullRegistry => true,
            Self::Application(m) => m.matches(&info.app),
            Self::Vip(m) => m.matches_opt(info.vip_address.as_deref()),
            Self::SecureVip(m) => m.matches_opt(info.secure_vip_address.as_deref()),
            Self::Instance(m) => m.matches(&info.id),
            Self::Multiple(all) => all.iter().any(|i| i.matches(info)),
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::FullRegistry => "full",
            Self::Application(_) => "application",
            Self::Vip(_) => "vip",
            Self::SecureVip(_) => "secure_vip",
            Self::Instance(_) => "instance",
            Self::Multiple(_) => "multiple",
        }
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::FullRegistry => write!(f, "full-registry"),
            Self::Application(m) => write!(f, "app{}", m),
            Self::Vip(m) => write!(f, "vip{}", m),
            Self::SecureVip(m) => write!(f, "secure-vip{}", m),
            Self::Instance(m) => write!(f, "instance{}", m),
            Self::Multiple(all) => {
                write!(f, "[")?;
                for (i, interest) in all.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", interest)?;
                }
                write!(f, "]")
            }
        }
    }
}
