use mesh_policy_test::{greeting::GREETING_PATH, with_scenario};
use reqwest::StatusCode;
use serial_test::serial;

#[tokio::test(flavor = "current_thread")]
#[serial]
async fn deny_rule_blocks_greeting_until_undeployed() {
    with_scenario(|scenario| async move {
        scenario
            .deploy_rule_file("block-greeting-service.yml")
            .await
            .expect("deny rule must deploy");

        // Converge on the expected failure before asserting on it.
        scenario
            .await_effect(GREETING_PATH, StatusCode::INTERNAL_SERVER_ERROR)
            .await
            .expect("deny rule must take effect");

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

        // Removing the rule must restore access. The end-of-scenario cleanup
        // then finds nothing left to undeploy.
        scenario
            .undeploy_policies()
            .await
            .expect("deny rule must undeploy");
        scenario
            .await_effect(GREETING_PATH, StatusCode::OK)
            .await
            .expect("access must be restored");

        let rsp = scenario.probe_greeting().await.expect("probe must complete");
        assert_eq!(rsp.status, StatusCode::OK, "api must return 200 again");
        assert!(
            rsp.body_contains("Hello"),
            "greeting must answer: {}",
            rsp.body
        );
    })
    .await;
}
