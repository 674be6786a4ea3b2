use std::time::Duration;

use mesh_policy_test::with_scenario;
use reqwest::StatusCode;
use serial_test::serial;

/// Time allowed for an allow-rule to propagate. Both before and after
/// propagation the API serves 200, so there is no status change to converge
/// on.
const PROPAGATION_DELAY: Duration = Duration::from_secs(60);

#[tokio::test(flavor = "current_thread")]
#[serial]
async fn allow_rule_admits_the_calling_service() {
    with_scenario(|scenario| async move {
        scenario
            .deploy_rule_file("require-service-account-and-label.yml")
            .await
            .expect("allow rule must deploy");

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
