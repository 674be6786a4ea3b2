use std::time::Duration;

use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    runtime::wait::{await_condition, conditions},
    ResourceExt,
};
use mesh_policy_k8s_api::{Deployment, Pod};
use reqwest::StatusCode;
use tokio::time;

use crate::{
    config::TestConfig,
    error::Error,
    probe::{LastObservation, Poller},
};

/// Annotation controlling mesh sidecar injection.
pub const INJECT_ANNOTATION: &str = "sidecar.istio.io/inject";

const REPLACEMENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Flips sidecar injection on the workload and waits for the replacement
/// instance to serve.
///
/// The cluster replaces the running pod rather than mutating it, so the wait
/// has two phases: first the snapshotted pod identity must disappear, then
/// the readiness endpoint must answer 200. The change is not reverted on
/// failure; callers restore state by toggling back.
pub async fn set_injection(
    client: &kube::Client,
    http: &reqwest::Client,
    config: &TestConfig,
    enabled: bool,
    readiness_url: &str,
) -> Result<(), Error> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), &config.namespace);

    let list = pods.list(&ListParams::default()).await?;
    let current =
        find_workload_pod(&list.items, &config.workload).ok_or_else(|| Error::InstanceNotFound {
            workload: config.workload.clone(),
            namespace: config.namespace.clone(),
        })?;
    let name = current.name_any();
    let uid = current.uid().unwrap_or_default();

    let value = if enabled { "true" } else { "false" };
    tracing::info!(workload = %config.workload, pod = %name, inject = value, "toggling sidecar injection");

    // Both annotation levels: the controller itself and the pod template it
    // stamps out.
    let patch = serde_json::json!({
        "metadata": { "annotations": { INJECT_ANNOTATION: value } },
        "spec": { "template": { "metadata": { "annotations": { INJECT_ANNOTATION: value } } } },
    });
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &config.namespace);
    deployments
        .patch(&config.workload, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    // Replacement has begun once the snapshotted identity is gone.
    let gone = await_condition(pods, &name, conditions::is_deleted(&uid));
    match time::timeout(REPLACEMENT_TIMEOUT, gone).await {
        Ok(Ok(_)) => tracing::debug!(pod = %name, "previous instance terminated"),
        Ok(Err(error)) => {
            return Err(Error::Watch {
                message: error.to_string(),
            })
        }
        Err(_elapsed) => {
            return Err(Error::PollTimeout {
                condition: format!("pod {name} to be replaced"),
                timeout: REPLACEMENT_TIMEOUT,
                last: LastObservation::Other(format!("pod {name} still running")),
            })
        }
    }

    // The replacement instance is serving once the readiness endpoint
    // answers 200.
    Poller::readiness()
        .await_status(http, readiness_url, StatusCode::OK)
        .await?;
    Ok(())
}

/// Selects the running workload pod by name substring, ignoring build pods
/// that share the workload's name prefix.
fn find_workload_pod<'p>(pods: &'p [Pod], workload: &str) -> Option<&'p Pod> {
    pods.iter().find(|pod| {
        let name = pod.name_any();
        name.contains(workload) && !name.contains("build")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_policy_k8s_api::ObjectMeta;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn selects_the_workload_pod_by_name() {
        let pods = vec![pod("ingressgateway-abc"), pod("greeting-7d9f5b-xyz")];
        let found = find_workload_pod(&pods, "greeting").expect("pod must be found");
        assert_eq!(found.name_any(), "greeting-7d9f5b-xyz");
    }

    #[test]
    fn ignores_build_pods() {
        let pods = vec![pod("greeting-build-1"), pod("greeting-1-abcde")];
        let found = find_workload_pod(&pods, "greeting").expect("pod must be found");
        assert_eq!(found.name_any(), "greeting-1-abcde");
    }

    #[test]
    fn missing_workload_yields_none() {
        let pods = vec![pod("other-service-1")];
        assert!(find_workload_pod(&pods, "greeting").is_none());
    }
}
