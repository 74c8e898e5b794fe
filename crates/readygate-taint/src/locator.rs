//! Locating a workload's pod on a node

use std::cmp::Ordering;
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use readygate_common::WorkloadWatch;

/// Source of the pod (if any) satisfying a watch on a node
pub trait PodLookup {
    /// The pod belonging to `watch` scheduled onto `node_name`
    fn pod_for(&self, node_name: &str, watch: &WorkloadWatch) -> Option<&Pod>;
}

/// Pods listed once per namespace, shared by every watch in that namespace
#[derive(Debug, Clone, Default)]
pub struct PodSnapshot {
    by_namespace: BTreeMap<String, Vec<Pod>>,
}

impl PodSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the full pod listing for a namespace
    pub fn insert(&mut self, namespace: impl Into<String>, pods: Vec<Pod>) {
        self.by_namespace.insert(namespace.into(), pods);
    }

    /// Pods recorded for a namespace
    pub fn pods(&self, namespace: &str) -> &[Pod] {
        self.by_namespace
            .get(namespace)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl PodLookup for PodSnapshot {
    fn pod_for(&self, node_name: &str, watch: &WorkloadWatch) -> Option<&Pod> {
        find_pod(node_name, watch, self.pods(&watch.namespace))
    }
}

/// Find the pod owned by `watch` that is scheduled onto `node_name`.
///
/// `pods` must already be scoped to the watch's namespace. Absence is a
/// normal state (the workload has not been scheduled there yet). Should more
/// than one pod match, the most recently created wins, then the
/// lexicographically smallest name.
pub fn find_pod<'a>(node_name: &str, watch: &WorkloadWatch, pods: &'a [Pod]) -> Option<&'a Pod> {
    pods.iter()
        .filter(|pod| scheduled_on(pod, node_name) && owned_by(pod, &watch.name))
        .min_by(|a, b| newest_first(a, b))
}

fn scheduled_on(pod: &Pod, node_name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .is_some_and(|n| n == node_name)
}

fn owned_by(pod: &Pod, workload: &str) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| owners.iter().any(|o| o.name == workload))
}

fn newest_first(a: &Pod, b: &Pod) -> Ordering {
    let created = |p: &Pod| p.metadata.creation_timestamp.as_ref().map(|t| t.0);
    created(b)
        .cmp(&created(a))
        .then_with(|| a.metadata.name.cmp(&b.metadata.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};

    fn pod(name: &str, owner: &str, node: Option<&str>, created_secs: i64) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("kube-system".to_string()),
                creation_timestamp: Some(Time(Utc.timestamp_opt(created_secs, 0).unwrap())),
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: "DaemonSet".to_string(),
                    name: owner.to_string(),
                    uid: format!("{owner}-uid"),
                    controller: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn kiam() -> WorkloadWatch {
        WorkloadWatch::new("kube-system", "kiam")
    }

    #[test]
    fn finds_pod_by_owner_and_node() {
        let pods = vec![
            pod("kiam-a", "kiam", Some("node-a"), 10),
            pod("kiam-b", "kiam", Some("node-b"), 10),
            pod("other-a", "other", Some("node-a"), 10),
        ];
        let found = find_pod("node-b", &kiam(), &pods).unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("kiam-b"));
    }

    #[test]
    fn missing_pod_is_none() {
        let pods = vec![
            pod("kiam-a", "kiam", Some("node-a"), 10),
            pod("kiam-pending", "kiam", None, 10),
        ];
        assert!(find_pod("node-c", &kiam(), &pods).is_none());
        assert!(find_pod("node-a", &kiam(), &[]).is_none());
    }

    #[test]
    fn duplicate_matches_prefer_newest_then_name() {
        let pods = vec![
            pod("kiam-old", "kiam", Some("node-a"), 10),
            pod("kiam-new", "kiam", Some("node-a"), 20),
        ];
        let found = find_pod("node-a", &kiam(), &pods).unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("kiam-new"));

        let pods = vec![
            pod("kiam-z", "kiam", Some("node-a"), 10),
            pod("kiam-y", "kiam", Some("node-a"), 10),
        ];
        let found = find_pod("node-a", &kiam(), &pods).unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("kiam-y"));
    }

    #[test]
    fn snapshot_scopes_lookup_by_namespace() {
        let mut snapshot = PodSnapshot::new();
        snapshot.insert("kube-system", vec![pod("kiam-a", "kiam", Some("node-a"), 10)]);

        assert_eq!(snapshot.pods("kube-system").len(), 1);
        assert!(snapshot.pods("dns").is_empty());
        assert!(snapshot.pod_for("node-a", &kiam()).is_some());
        assert!(snapshot
            .pod_for("node-a", &WorkloadWatch::new("dns", "kiam"))
            .is_none());
    }
}
