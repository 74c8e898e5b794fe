//! Kubernetes Events on nodes
//!
//! Taint changes are surfaced as Events on the node so they show up in
//! `kubectl describe node`. Publishing is best effort: a failed publish is
//! logged and dropped, and never reaches the reconciler.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Reason for a successful taint change
pub const REASON_TAINTS_CHANGED: &str = "TaintsChanged";
/// Reason for a failed node write
pub const REASON_TAINT_UPDATE_FAILED: &str = "TaintUpdateFailed";
/// Action recorded on every readygate event
pub const ACTION_RECONCILE: &str = "Reconcile";

/// A node event, independent of how it is delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    /// Normal for changes, Warning for failures
    pub warning: bool,
    /// Machine-readable reason
    pub reason: &'static str,
    /// Human-readable message
    pub note: String,
}

impl NodeEvent {
    /// Managed taints were added or removed
    pub fn taints_changed(note: impl Into<String>) -> Self {
        Self {
            warning: false,
            reason: REASON_TAINTS_CHANGED,
            note: note.into(),
        }
    }

    /// Writing the node back failed
    pub fn update_failed(note: impl Into<String>) -> Self {
        Self {
            warning: true,
            reason: REASON_TAINT_UPDATE_FAILED,
            note: note.into(),
        }
    }

    fn to_kube(&self) -> Event {
        Event {
            type_: if self.warning {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: self.reason.to_string(),
            note: Some(self.note.clone()),
            action: ACTION_RECONCILE.to_string(),
            secondary: None,
        }
    }
}

/// Sink for node events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event` on the object `target` refers to; never fails
    async fn publish(&self, target: &ObjectReference, event: NodeEvent);
}

/// Publisher backed by the kube events `Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Report as `component`, with this pod's name (if known) as the instance
    pub fn new(client: Client, component: &str) -> Self {
        let reporter = Reporter {
            controller: component.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, target: &ObjectReference, event: NodeEvent) {
        if let Err(e) = self.recorder.publish(&event.to_kube(), target).await {
            warn!(
                reason = event.reason,
                object = target.name.as_deref().unwrap_or_default(),
                error = %e,
                "Failed to publish event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_are_normal_events() {
        let event = NodeEvent::taints_changed("added x").to_kube();
        assert_eq!(event.type_, EventType::Normal);
        assert_eq!(event.reason, REASON_TAINTS_CHANGED);
        assert_eq!(event.action, ACTION_RECONCILE);
        assert_eq!(event.note.as_deref(), Some("added x"));
    }

    #[test]
    fn failures_are_warnings() {
        let event = NodeEvent::update_failed("conflict").to_kube();
        assert_eq!(event.type_, EventType::Warning);
        assert_eq!(event.reason, REASON_TAINT_UPDATE_FAILED);
    }
}
