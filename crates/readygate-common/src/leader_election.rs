//! Leader election using Kubernetes Leases
//!
//! Only the leader runs the node controller, so at most one replica writes
//! node taints at a time.
//!
//! # Atomicity
//!
//! Uses resourceVersion for compare-and-swap semantics. If the lease changes
//! between read and write, the update fails with 409 Conflict and we retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::FIELD_MANAGER;

/// Default lease name for the readygate controller
pub const DEFAULT_LEASE_NAME: &str = "readygate-leader";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The lease read back from the API server has no resourceVersion
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
}

impl LeaderElector {
    /// Create a new leader elector with default timing (30s lease, 10s renew, 5s retry)
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
            renew_interval: RENEW_INTERVAL,
            retry_interval: RETRY_INTERVAL,
        }
    }

    /// Block until leadership is acquired, then return a guard
    ///
    /// The guard keeps renewing the lease; `LeaderGuard::lost` resolves when
    /// a renewal fails.
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(
                        identity = %self.identity,
                        retry_secs = self.retry_interval.as_secs(),
                        "Lease held by another, waiting..."
                    );
                }
                Err(e) => {
                    warn!(
                        identity = %self.identity,
                        error = %e,
                        retry_secs = self.retry_interval.as_secs(),
                        "Failed to acquire lease, retrying..."
                    );
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    /// One election round; `Ok(true)` while we hold the lease
    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let existing = api.get_opt(&self.lease_name).await?;
        match (next_step(existing.as_ref(), &self.identity, now), existing) {
            (LeaseStep::Create, _) => self.create_lease(&api, now).await,
            (LeaseStep::Renew { transitions }, Some(lease)) => {
                self.write_lease(&api, &lease, now, transitions, false).await
            }
            (LeaseStep::TakeOver { transitions }, Some(lease)) => {
                self.write_lease(&api, &lease, now, transitions, true).await
            }
            _ => Ok(false),
        }
    }

    async fn create_lease(
        &self,
        api: &Api<Lease>,
        now: DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, now, 0)),
        };

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.identity, "Created new lease");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease creation conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Renew our own lease or take over an expired one, guarded by resourceVersion
    async fn write_lease(
        &self,
        api: &Api<Lease>,
        existing: &Lease,
        now: DateTime<Utc>,
        transitions: i32,
        takeover: bool,
    ) -> Result<bool, LeaderElectionError> {
        let resource_version = existing
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))?;

        let acquired = if takeover {
            now
        } else {
            existing
                .spec
                .as_ref()
                .and_then(|s| s.acquire_time.as_ref())
                .map(|t| t.0)
                .unwrap_or(now)
        };

        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: Some(resource_version),
                ..Default::default()
            },
            spec: Some(self.lease_spec(acquired, now, transitions)),
        };

        match api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => {
                if takeover {
                    info!(identity = %self.identity, transitions, "Took over expired lease");
                } else {
                    debug!(identity = %self.identity, "Lease renewed");
                }
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, takeover, "Lease write conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lease_spec(&self, acquired: DateTime<Utc>, now: DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
            acquire_time: Some(MicroTime(acquired)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.renew_interval).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Release the lease so a standby can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let lease = match api.get_opt(&self.lease_name).await? {
            Some(l) => l,
            None => {
                debug!(identity = %self.identity, "Lease not found, nothing to release");
                return Ok(());
            }
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            debug!(identity = %self.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "spec": {
                "holderIdentity": null,
                "renewTime": MicroTime(past)
            }
        });

        api.patch(
            &self.lease_name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Merge(&patch),
        )
        .await?;

        info!(identity = %self.identity, "Lease released for fast failover");
        Ok(())
    }
}

/// What an election round should do with the lease it read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseStep {
    /// No lease exists yet
    Create,
    /// We hold it; extend it
    Renew { transitions: i32 },
    /// Its holder stopped renewing; claim it
    TakeOver { transitions: i32 },
    /// Someone else holds it
    Wait,
}

fn next_step(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseStep {
    let Some(lease) = lease else {
        return LeaseStep::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);

    if holder == Some(identity) {
        LeaseStep::Renew { transitions }
    } else if lease_is_expired(spec, now) {
        LeaseStep::TakeOver {
            transitions: transitions + 1,
        }
    } else {
        LeaseStep::Wait
    }
}

/// Whether a lease's holder has stopped renewing it
fn lease_is_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(spec) = spec else {
        return true;
    };
    match (&spec.holder_identity, &spec.renew_time, spec.lease_duration_seconds) {
        (Some(_), Some(renewed), Some(secs)) => {
            now > renewed.0 + chrono::Duration::seconds(i64::from(secs))
        }
        _ => true,
    }
}

/// Guard that maintains leadership
///
/// The renewal task is aborted when the guard is dropped.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Release leadership by clearing the lease holder
    pub async fn release_leadership(&self) -> Result<(), LeaderElectionError> {
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
        info!(identity = %self.elector.identity, "Leadership released");
    }
}
