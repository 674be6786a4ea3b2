use std::time::Duration;

use maplit::{btreemap, convert_args};
use mesh_policy_k8s_api::{
    authorization_policy::{
        Action, AuthorizationPolicy, AuthorizationPolicySpec, Rule, RuleFrom, Source,
        WorkloadSelector,
    },
    ObjectMeta,
};
use mesh_policy_test::{greeting::GREETING_PATH, with_scenario};
use reqwest::StatusCode;
use serial_test::serial;

/// Mesh-internal identity of the ingress gateway.
const INGRESS_PRINCIPAL: &str =
    "cluster.local/ns/istio-system/sa/istio-ingressgateway-service-account";

/// Time allowed for an allow-rule to propagate when no status change can
/// signal it.
const PROPAGATION_DELAY: Duration = Duration::from_secs(60);

#[tokio::test(flavor = "current_thread")]
#[serial]
async fn deny_all_policy_blocks_calls() {
    with_scenario(|scenario| async move {
        scenario
            .deploy_policy(deny_backend(scenario.namespace()))
            .await
            .expect("deny policy must apply");

        scenario
            .await_effect(GREETING_PATH, StatusCode::INTERNAL_SERVER_ERROR)
            .await
            .expect("deny policy must take effect");

        let rsp = scenario.probe_greeting().await.expect("probe must complete");
        assert_eq!(
            rsp.status,
            StatusCode::INTERNAL_SERVER_ERROR,
            "blocked api must return 500"
        );
        assert!(
            rsp.body_contains("403 Forbidden"),
            "body must surface the denial: {}",
            rsp.body
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
#[serial]
async fn ingress_principal_allow_policy_preserves_access() {
    with_scenario(|scenario| async move {
        scenario
            .deploy_policy(allow_from_ingress(
                scenario.namespace(),
                scenario.workload(),
            ))
            .await
            .expect("allow policy must apply");

        tokio::time::sleep(PROPAGATION_DELAY).await;

        let rsp = scenario.probe_greeting().await.expect("probe must complete");
        assert_eq!(rsp.status, StatusCode::OK, "allowed api must return 200");
        assert!(
            rsp.body_contains("Hello"),
            "greeting must answer: {}",
            rsp.body
        );
    })
    .await;
}

// === helpers ===

fn deny_backend(ns: &str) -> AuthorizationPolicy {
    AuthorizationPolicy {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some("deny-greeting-name".to_string()),
            ..Default::default()
        },
        spec: AuthorizationPolicySpec {
            selector: Some(WorkloadSelector {
                match_labels: convert_args!(btreemap!(
                    "app" => "greeting-name",
                )),
            }),
            action: Some(Action::Deny),
            // An empty rule matches every request.
            rules: vec![Rule::default()],
        },
    }
}

fn allow_from_ingress(ns: &str, workload: &str) -> AuthorizationPolicy {
    AuthorizationPolicy {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some("allow-from-ingress".to_string()),
            ..Default::default()
        },
        spec: AuthorizationPolicySpec {
            selector: Some(WorkloadSelector {
                match_labels: convert_args!(btreemap!(
                    "app" => workload,
                )),
            }),
            action: Some(Action::Allow),
            rules: vec![Rule {
                from: vec![RuleFrom {
                    source: Source {
                        principals: vec![INGRESS_PRINCIPAL.to_string()],
                        namespaces: Vec::new(),
                    },
                }],
                ..Default::default()
            }],
        },
    }
}
