//! Typed resource shares.
//!
//! A resource is not a single scalar per name: the same resource may be
//! partitioned across roles (e.g. memory split between the default role and
//! a reserved role). Totals are computed by summing every share.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Role assigned to unreserved resources.
pub const DEFAULT_ROLE: &str = "*";

/// Well-known resource name for CPU shares.
pub const CPUS: &str = "cpus";
/// Well-known resource name for memory, in MB.
pub const MEM: &str = "mem";
/// Well-known resource name for disk, in MB.
pub const DISK: &str = "disk";
/// Well-known resource name for port ranges.
pub const PORTS: &str = "ports";

/// Value carried by a resource share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceValue {
    /// Divisible amount, e.g. `cpus:1.5`.
    Scalar(f64),
    /// Inclusive integer ranges, e.g. ports.
    Ranges(Vec<(u64, u64)>),
    /// Named items, e.g. GPUs or devices.
    Set(BTreeSet<String>),
}

/// One share of a named resource allocated to a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource name (`cpus`, `mem`, ...).
    pub name: String,
    /// Role the share is allocated to.
    #[serde(default = "default_role")]
    pub role: String,
    /// The share itself.
    pub value: ResourceValue,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

impl Resource {
    /// Creates a scalar share for the default role.
    #[must_use]
    pub fn scalar(name: impl Into<String>, amount: f64) -> Self {
        Self {
            name: name.into(),
            role: default_role(),
            value: ResourceValue::Scalar(amount),
        }
    }

    /// Reassigns this share to a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):", self.name, self.role)?;
        match &self.value {
            ResourceValue::Scalar(v) => write!(f, "{v}"),
            ResourceValue::Ranges(ranges) => {
                let parts: Vec<_> = ranges.iter().map(|(b, e)| format!("{b}-{e}")).collect();
                write!(f, "[{}]", parts.join(","))
            }
            ResourceValue::Set(items) => {
                write!(f, "{{{}}}", items.iter().cloned().collect::<Vec<_>>().join(","))
            }
        }
    }
}

/// An ordered collection of resource shares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources(Vec<Resource>);

impl Resources {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a share.
    pub fn push(&mut self, resource: Resource) {
        self.0.push(resource);
    }

    /// Builder-style [`Resources::push`].
    #[must_use]
    pub fn with(mut self, resource: Resource) -> Self {
        self.push(resource);
        self
    }

    /// Sums every scalar share of `name` across all roles.
    ///
    /// Returns `None` when no scalar share of that name exists.
    #[must_use]
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.0
            .iter()
            .filter(|r| r.name == name)
            .filter_map(|r| match r.value {
                ResourceValue::Scalar(v) => Some(v),
                _ => None,
            })
            .reduce(|a, b| a + b)
    }

    /// Returns the shares allocated to `role`.
    #[must_use]
    pub fn for_role(&self, role: &str) -> Self {
        Self(self.0.iter().filter(|r| r.role == role).cloned().collect())
    }

    /// Returns the shares named `name`.
    #[must_use]
    pub fn named(&self, name: &str) -> Self {
        Self(self.0.iter().filter(|r| r.name == name).cloned().collect())
    }

    /// Iterates over the shares.
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.0.iter()
    }

    /// Returns whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of shares.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<Resource> for Resources {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Resources {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(";"))
    }
}

/// Point-in-time usage reported by isolators.
///
/// Fields are optional because each isolator only knows its own subsystem;
/// the containerizer overlays the partial reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatistics {
    /// Current memory usage in bytes.
    pub memory_current_bytes: Option<u64>,
    /// Peak memory usage in bytes.
    pub memory_peak_bytes: Option<u64>,
    /// Configured memory limit in bytes.
    pub memory_limit_bytes: Option<u64>,
    /// Cumulative OOM kills.
    pub oom_kills: Option<u64>,
    /// Cumulative CPU time in microseconds.
    pub cpu_usage_usec: Option<u64>,
    /// Configured CPU weight.
    pub cpu_weight: Option<u64>,
}

impl ResourceStatistics {
    /// Overlays every field set in `other` onto `self`.
    pub fn overlay(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            memory_current_bytes,
            memory_peak_bytes,
            memory_limit_bytes,
            oom_kills,
            cpu_usage_usec,
            cpu_weight
        );
    }
}
