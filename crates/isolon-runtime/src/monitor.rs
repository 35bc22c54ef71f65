//! The limitation monitor.
//!
//! One forwarder task per prepared isolator drains that isolator's feed
//! into a shared channel. The monitor task hands the first limitation to
//! the containerizer at once, then folds whatever else arrives within one
//! monitor interval into it. It keeps draining afterwards so late
//! limitations are still recorded.

use std::sync::Arc;

use isolon_common::protocol::ContainerLimitation;
use tokio::sync::mpsc;

use crate::containerizer::Inner;
use crate::registry::ContainerEntry;

const FORWARD_CAPACITY: usize = 64;

pub fn spawn(inner: &Arc<Inner>, entry: &Arc<ContainerEntry>) {
    let prepared = entry.record().prepared.clone();
    let (tx, rx) = mpsc::channel(FORWARD_CAPACITY);
    for isolator in prepared {
        let mut feed = isolator.watch(&entry.id);
        let tx = tx.clone();
        let stop = entry.monitor.clone();
        let name = isolator.name().to_string();
        let id = entry.id.clone();
        drop(tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    () = stop.cancelled() => None,
                    next = feed.next() => next,
                };
                let Some(limitation) = next else {
                    break;
                };
                tracing::debug!(
                    id = %id,
                    isolator = %name,
                    message = %limitation.message,
                    "limitation observed"
                );
                if tx.send(limitation).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(tx);
    tracing::debug!(id = %entry.id, "limitation monitor started");
    drop(tokio::spawn(run(Arc::clone(inner), Arc::clone(entry), rx)));
}

async fn run(
    inner: Arc<Inner>,
    entry: Arc<ContainerEntry>,
    mut rx: mpsc::Receiver<ContainerLimitation>,
) {
    let interval = inner.options.monitor_interval;
    loop {
        let first = tokio::select! {
            () = entry.monitor.cancelled() => None,
            next = rx.recv() => next,
        };
        let Some(limitation) = first else {
            break;
        };
        inner.limit(&entry, limitation);
        let deadline = tokio::time::Instant::now() + interval;
        while let Ok(Some(next)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            inner.coalesce_limitation(&entry, next);
        }
    }
    tracing::debug!(id = %entry.id, "limitation monitor stopped");
}

/// Folds a later limitation of the same interval into the first one.
///
/// The message is appended; reason and resources are only taken when the
/// first limitation had none.
pub fn coalesce(first: &mut ContainerLimitation, next: ContainerLimitation) {
    if !next.message.is_empty() {
        if !first.message.is_empty() {
            first.message.push_str("; ");
        }
        first.message.push_str(&next.message);
    }
    if first.reason.is_none() {
        first.reason = next.reason;
    }
    if first.resources.is_empty() {
        first.resources = next.resources;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolon_common::resources::{MEM, Resource, Resources};
    use isolon_common::types::TaskStatusReason;

    #[test]
    fn first_reason_wins_and_messages_append() {
        let mut first = ContainerLimitation::new(
            Resources::new().with(Resource::scalar(MEM, 512.0)),
            "memory",
            Some(TaskStatusReason::ContainerLimitationMemory),
        );
        coalesce(
            &mut first,
            ContainerLimitation::new(Resources::new(), "disk", Some(TaskStatusReason::ContainerLimitationDisk)),
        );
        assert_eq!(first.message, "memory; disk");
        assert_eq!(first.reason, Some(TaskStatusReason::ContainerLimitationMemory));
        assert_eq!(first.resources.scalar(MEM), Some(512.0));
    }

    #[test]
    fn missing_reason_is_filled_in() {
        let mut first = ContainerLimitation::new(Resources::new(), "", None);
        coalesce(
            &mut first,
            ContainerLimitation::new(
                Resources::new().with(Resource::scalar(MEM, 1.0)),
                "oom",
                Some(TaskStatusReason::ContainerLimitationMemory),
            ),
        );
        assert_eq!(first.message, "oom");
        assert_eq!(first.reason, Some(TaskStatusReason::ContainerLimitationMemory));
        assert!(!first.resources.is_empty());
    }
}
