//! Mapping pod changes to node reconciliations

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::reflector::ObjectRef;
use tracing::trace;

const DAEMONSET_KIND: &str = "DaemonSet";

/// The node a pod change should re-reconcile.
///
/// Only scheduled pods controlled by a DaemonSet can affect node taints;
/// everything else maps to nothing.
pub fn node_for_pod(pod: Pod) -> Option<ObjectRef<Node>> {
    let node_name = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())?;

    let daemonset_owned = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| {
            owners
                .iter()
                .any(|o| o.controller == Some(true) && o.kind == DAEMONSET_KIND)
        });
    if !daemonset_owned {
        return None;
    }

    trace!(
        pod = pod.metadata.name.as_deref().unwrap_or_default(),
        node = node_name,
        "pod change triggers node reconcile"
    );
    Some(ObjectRef::new(node_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use rstest::rstest;

    fn pod(node: Option<&str>, kind: &str, controller: Option<bool>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("agent-x1".to_string()),
                namespace: Some("kube-system".to_string()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: kind.to_string(),
                    name: "agent".to_string(),
                    controller,
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

    #[test]
    fn daemonset_pod_maps_to_its_node() {
        let target = node_for_pod(pod(Some("node-a"), "DaemonSet", Some(true))).unwrap();
        assert_eq!(target.name, "node-a");
        assert_eq!(target.namespace, None);
    }

    #[rstest]
    #[case::unscheduled(None, "DaemonSet", Some(true))]
    #[case::empty_node_name(Some(""), "DaemonSet", Some(true))]
    #[case::replicaset_owner(Some("node-a"), "ReplicaSet", Some(true))]
    #[case::non_controller_owner(Some("node-a"), "DaemonSet", None)]
    fn other_pods_map_to_nothing(
        #[case] node: Option<&str>,
        #[case] kind: &str,
        #[case] controller: Option<bool>,
    ) {
        assert!(node_for_pod(pod(node, kind, controller)).is_none());
    }

    #[test]
    fn ownerless_pod_maps_to_nothing() {
        let mut p = pod(Some("node-a"), "DaemonSet", Some(true));
        p.metadata.owner_references = None;
        assert!(node_for_pod(p).is_none());
    }
}
