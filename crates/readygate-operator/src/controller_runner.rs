//! Controller runner - builds the node controller future
//!
//! Construction is kept separate from `main` so the caller decides when the
//! future runs (immediately, or only while leadership is held).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use readygate_common::ValidatedConfig;
use readygate_taint::{error_policy, node_for_pod, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the node controller future
///
/// Nodes are reconciled on their own changes and whenever a DaemonSet pod
/// scheduled onto them changes.
pub fn build_node_controller(
    client: Client,
    config: Arc<ValidatedConfig>,
    concurrency: u16,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    tracing::info!(
        watches = config.watches.len(),
        selector = %config.selector,
        concurrency,
        "- Node controller"
    );

    let ctx = Arc::new(Context::builder(client.clone(), config).build());
    let nodes: Api<Node> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client);

    Box::pin(
        Controller::new(nodes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .watches(
                pods,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                node_for_pod,
            )
            .with_config(ControllerConfig::default().concurrency(concurrency))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Node")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
