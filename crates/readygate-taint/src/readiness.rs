//! Pod readiness

use k8s_openapi::api::core::v1::Pod;

/// Whether every container in the pod reports ready.
///
/// A pod with no container statuses yet is not ready.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| !statuses.is_empty() && statuses.iter().all(|c| c.ready))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};
    use rstest::rstest;

    fn pod_with_statuses(ready: Option<Vec<bool>>) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: ready.map(|flags| {
                    flags
                        .into_iter()
                        .enumerate()
                        .map(|(i, ready)| ContainerStatus {
                            name: format!("c{i}"),
                            ready,
                            ..Default::default()
                        })
                        .collect()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[rstest]
    #[case::all_ready(Some(vec![true, true]), true)]
    #[case::one_not_ready(Some(vec![true, false]), false)]
    #[case::single_ready(Some(vec![true]), true)]
    #[case::empty_statuses(Some(vec![]), false)]
    #[case::no_statuses(None, false)]
    fn readiness_requires_every_container(#[case] flags: Option<Vec<bool>>, #[case] ready: bool) {
        assert_eq!(is_pod_ready(&pod_with_statuses(flags)), ready);
    }

    #[test]
    fn pod_without_status_is_not_ready() {
        assert!(!is_pod_ready(&Pod::default()));
    }
}
