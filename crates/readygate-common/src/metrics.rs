//! Metrics registry for readygate
//!
//! OpenTelemetry instruments for taint operations and reconcile latency.
//! Instruments are registered lazily on the global meter; they are only
//! reached through the taint reporter, never from the calculation itself.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for readygate metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("readygate"));

/// Counter of managed taints added to or removed from nodes
///
/// Labels:
/// - `operation`: added, removed
/// - `taint`: the managed taint key
pub static TAINT_OPERATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("readygate_taint_operations_total")
        .with_description("Total number of managed taint additions and removals")
        .with_unit("{operations}")
        .build()
});

/// Counter of failed taint operations
///
/// Labels:
/// - `operation`: update
pub static TAINT_OPERATION_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("readygate_taint_operation_errors_total")
        .with_description("Total number of failed node taint updates")
        .with_unit("{errors}")
        .build()
});

/// Histogram of node reconciliation duration
///
/// Labels:
/// - `outcome`: not_found, out_of_scope, no_change, updated, failed
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("readygate_reconcile_duration_seconds")
        .with_description("Duration of node reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Kind of change applied to a managed taint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaintOperation {
    /// The taint was added to the node
    Added,
    /// The taint was removed from the node
    Removed,
}

impl TaintOperation {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
        }
    }
}

/// Record one taint addition or removal
pub fn record_taint_operation(operation: TaintOperation, taint: &str) {
    TAINT_OPERATIONS.add(
        1,
        &[
            KeyValue::new("operation", operation.as_str()),
            KeyValue::new("taint", taint.to_string()),
        ],
    );
}

/// Record a failed node update
pub fn record_taint_operation_error(operation: &'static str) {
    TAINT_OPERATION_ERRORS.add(1, &[KeyValue::new("operation", operation)]);
}

/// Record how long one reconciliation took
pub fn record_reconcile_duration(outcome: &'static str, seconds: f64) {
    RECONCILE_DURATION.record(seconds, &[KeyValue::new("outcome", outcome)]);
}
