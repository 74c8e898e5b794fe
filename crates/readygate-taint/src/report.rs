//! Reporting taint changes as metrics and Kubernetes Events

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

use readygate_common::events::{EventPublisher, NodeEvent};
use readygate_common::metrics::{
    record_taint_operation, record_taint_operation_error, TaintOperation,
};
use readygate_common::Error;

use crate::controller::NodeUpdate;

/// Receives the outcome of each node write
///
/// Implementations must not fail; problems are logged and swallowed.
#[async_trait]
pub trait TaintReporter: Send + Sync {
    /// The node was written with the given changes
    async fn record_changes(&self, node: &Node, update: &NodeUpdate);

    /// Writing the node failed
    async fn record_failure(&self, node: &Node, error: &Error);
}

/// Reporter backed by the OpenTelemetry counters and an [`EventPublisher`]
pub struct KubeTaintReporter {
    events: Arc<dyn EventPublisher>,
}

impl KubeTaintReporter {
    /// Create a reporter publishing events through `events`
    pub fn new(events: Arc<dyn EventPublisher>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl TaintReporter for KubeTaintReporter {
    async fn record_changes(&self, node: &Node, update: &NodeUpdate) {
        for key in &update.changes.added {
            record_taint_operation(TaintOperation::Added, key);
        }
        for key in &update.changes.removed {
            record_taint_operation(TaintOperation::Removed, key);
        }

        info!(
            node = %node.name_any(),
            added = ?update.changes.added,
            removed = ?update.changes.removed,
            first_ready = update.first_ready.as_deref().unwrap_or_default(),
            "node taints updated"
        );

        self.events
            .publish(&node.object_ref(&()), NodeEvent::taints_changed(change_note(update)))
            .await;
    }

    async fn record_failure(&self, node: &Node, error: &Error) {
        record_taint_operation_error("update");
        warn!(node = %node.name_any(), error = %error, "failed to update node taints");

        self.events
            .publish(&node.object_ref(&()), NodeEvent::update_failed(error.to_string()))
            .await;
    }
}

/// Human-readable summary placed on the event
fn change_note(update: &NodeUpdate) -> String {
    let list = |keys: &[String]| {
        if keys.is_empty() {
            "none".to_string()
        } else {
            keys.join(", ")
        }
    };
    let mut note = format!(
        "Taints added: {}; removed: {}",
        list(&update.changes.added),
        list(&update.changes.removed)
    );
    if let Some(ts) = &update.first_ready {
        note.push_str(&format!("; first ready at {ts}"));
    }
    note
}
