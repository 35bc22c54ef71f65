//! Container lifecycle event streaming.
//!
//! Every state change of every container is published on a broadcast
//! channel so that callers can observe transitions without polling.

use chrono::{DateTime, Utc};
use isolon_common::types::{ContainerId, LifecycleState};
use serde::{Deserialize, Serialize};

/// A container changed lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Container that changed.
    pub id: ContainerId,
    /// Previous state; `None` when the container was just registered.
    pub from: Option<LifecycleState>,
    /// New state.
    pub to: LifecycleState,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn now(id: ContainerId, from: Option<LifecycleState>, to: LifecycleState) -> Self {
        Self {
            id,
            from,
            to,
            at: Utc::now(),
        }
    }
}
