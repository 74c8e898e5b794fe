//! Readiness taint reconciliation for cluster nodes
//!
//! Keeps a `NoSchedule` taint on every managed node for each required
//! DaemonSet whose pod is missing or not ready there, removes it once the
//! pod is ready, and records when the node first carried no managed taints.
//!
//! The pure pieces ([`readiness`], [`locator`], [`scope`], [`taints`],
//! [`milestone`]) do no I/O; [`controller`] composes them around the
//! cluster collaborators.

#![deny(missing_docs)]

pub mod controller;
pub mod locator;
pub mod milestone;
pub mod readiness;
pub mod report;
pub mod scope;
pub mod taints;
pub mod watch;

pub use controller::{
    error_policy, reconcile, reconcile_node, Clock, Context, ContextBuilder, KubeClient,
    KubeClientImpl, NodeUpdate, ReconcileOutcome, SystemClock,
};
pub use locator::{find_pod, PodLookup, PodSnapshot};
pub use milestone::apply_milestone;
pub use readiness::is_pod_ready;
pub use report::{KubeTaintReporter, TaintReporter};
pub use scope::in_scope;
pub use taints::{calculate, is_managed_taint, TaintCalculation, TaintChanges};
pub use watch::node_for_pod;
