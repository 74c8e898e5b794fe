//! Node readiness taint controller
//!
//! Reconciles one node at a time: fetch it, check it is in scope, list the
//! pods of every watched namespace, compute the taints it should carry and
//! the first-ready milestone, and write it back only when either changed.
//!
//! The kube runtime guarantees at most one in-flight reconciliation per node,
//! so nothing here locks. A write carries the fetched resourceVersion; a
//! concurrent modification surfaces as a 409 and is retried from a fresh
//! fetch by [`error_policy`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, Taint};
use kube::api::{Api, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, instrument};

#[cfg(test)]
use mockall::automock;

use readygate_common::events::KubeEventPublisher;
use readygate_common::metrics::record_reconcile_duration;
use readygate_common::{Error, ValidatedConfig, FIELD_MANAGER};

use crate::locator::PodSnapshot;
use crate::milestone::{apply_milestone, first_ready};
use crate::report::{KubeTaintReporter, TaintReporter};
use crate::scope::in_scope;
use crate::taints::{calculate, node_taints, TaintChanges};

/// Delay before retrying a failed reconciliation
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Trait abstracting the Kubernetes operations the node controller needs
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Node by name, `None` if it no longer exists
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error>;

    /// List the pods in a namespace scheduled onto `node_name`
    async fn list_pods(&self, namespace: &str, node_name: &str) -> Result<Vec<Pod>, Error>;

    /// Replace a Node; fails with 409 Conflict if its resourceVersion is stale
    async fn replace_node(&self, node: &Node) -> Result<Node, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_pods(&self, namespace: &str, node_name: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        Ok(api.list(&params).await?.items)
    }

    async fn replace_node(&self, node: &Node) -> Result<Node, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("replace_node", "node has no name"))?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(api.replace(name, &params, node).await?)
    }
}

/// Source of the current time for milestone stamps
#[cfg_attr(test, automock)]
pub trait Clock: Send + Sync {
    /// The current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared context for the node controller
///
/// Use [`ContextBuilder`] in production:
///
/// ```text
/// let ctx = Context::builder(client, config).build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Receives every write outcome
    pub reporter: Arc<dyn TaintReporter>,
    /// Time source for the first-ready milestone
    pub clock: Arc<dyn Clock>,
    /// Validated watches and node selector
    pub config: Arc<ValidatedConfig>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, config: Arc<ValidatedConfig>) -> ContextBuilder {
        ContextBuilder::new(client, config)
    }

    /// Create a context from explicit collaborators
    pub fn new(
        kube: Arc<dyn KubeClient>,
        reporter: Arc<dyn TaintReporter>,
        clock: Arc<dyn Clock>,
        config: Arc<ValidatedConfig>,
    ) -> Self {
        Self {
            kube,
            reporter,
            clock,
            config,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    config: Arc<ValidatedConfig>,
    kube: Option<Arc<dyn KubeClient>>,
    reporter: Option<Arc<dyn TaintReporter>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ContextBuilder {
    fn new(client: Client, config: Arc<ValidatedConfig>) -> Self {
        Self {
            client,
            config,
            kube: None,
            reporter: None,
            clock: None,
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the change reporter
    pub fn reporter(mut self, reporter: Arc<dyn TaintReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Override the clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(client.clone()))),
            reporter: self.reporter.unwrap_or_else(|| {
                let events = Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER));
                Arc::new(KubeTaintReporter::new(events))
            }),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
        }
    }
}

/// What a successful write changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeUpdate {
    /// Managed taints added and removed
    pub changes: TaintChanges,
    /// The first-ready milestone after the write, if the node has one
    pub first_ready: Option<String>,
}

/// Terminal state of one node reconciliation
///
/// Failures are the `Err` side of [`reconcile_node`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The node no longer exists
    NotFound,
    /// The node does not match the node selector
    OutOfScope,
    /// The node already carries the right taints and milestone
    NoChange,
    /// The node was written back
    Updated(NodeUpdate),
}

impl ReconcileOutcome {
    /// Metric label for this outcome
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::OutOfScope => "out_of_scope",
            Self::NoChange => "no_change",
            Self::Updated(_) => "updated",
        }
    }
}

/// Reconcile a Node for the kube runtime controller
///
/// Every successful outcome waits for the next change event; errors go to
/// [`error_policy`].
#[instrument(skip(node, ctx), fields(node = %node.name_any()))]
pub async fn reconcile(node: Arc<Node>, ctx: Arc<Context>) -> Result<Action, Error> {
    let started = Instant::now();
    let result = reconcile_node(&node.name_any(), &ctx).await;

    let outcome = match &result {
        Ok(outcome) => outcome.as_str(),
        Err(_) => "failed",
    };
    record_reconcile_duration(outcome, started.elapsed().as_secs_f64());

    result.map(|_| Action::await_change())
}

/// Bring one node's managed taints and first-ready milestone up to date
///
/// Runs against a fresh fetch of the node. Pods are listed once per watched
/// namespace before anything is calculated, so a failed listing never leads
/// to a partial change.
pub async fn reconcile_node(name: &str, ctx: &Context) -> Result<ReconcileOutcome, Error> {
    let Some(node) = ctx.kube.get_node(name).await? else {
        debug!(node = name, "node not found");
        return Ok(ReconcileOutcome::NotFound);
    };

    if !in_scope(&node, &ctx.config.selector) {
        debug!(node = name, "node outside selector, skipping");
        return Ok(ReconcileOutcome::OutOfScope);
    }

    let pods = pod_snapshot(name, ctx).await?;
    let calculation = calculate(&node, &ctx.config.watches, &pods);

    let mut desired = node.clone();
    set_taints(&mut desired, calculation.taints);
    let first_ready = apply_milestone(&mut desired, ctx.clock.now());

    if !needs_write(&node, &desired) {
        debug!(node = name, "node already converged");
        return Ok(ReconcileOutcome::NoChange);
    }

    let update = NodeUpdate {
        changes: calculation.changes,
        first_ready,
    };

    match ctx.kube.replace_node(&desired).await {
        Ok(_) => {
            ctx.reporter.record_changes(&desired, &update).await;
            Ok(ReconcileOutcome::Updated(update))
        }
        Err(e) => {
            ctx.reporter.record_failure(&node, &e).await;
            Err(e)
        }
    }
}

/// Error policy for the node controller
pub fn error_policy(node: Arc<Node>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        node = %node.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

async fn pod_snapshot(node_name: &str, ctx: &Context) -> Result<PodSnapshot, Error> {
    let mut snapshot = PodSnapshot::new();
    for namespace in ctx.config.namespaces() {
        let pods = ctx.kube.list_pods(namespace, node_name).await?;
        snapshot.insert(namespace, pods);
    }
    Ok(snapshot)
}

fn set_taints(node: &mut Node, taints: Vec<Taint>) {
    let taints = (!taints.is_empty()).then_some(taints);
    match node.spec.as_mut() {
        Some(spec) => spec.taints = taints,
        None if taints.is_some() => {
            node.spec = Some(NodeSpec {
                taints,
                ..Default::default()
            })
        }
        None => {}
    }
}

/// Compare only what reconciliation may change: taints and the milestone.
/// A missing taint list and an empty one are the same.
fn needs_write(current: &Node, desired: &Node) -> bool {
    node_taints(current) != node_taints(desired) || first_ready(current) != first_ready(desired)
}
