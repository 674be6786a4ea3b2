use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use kube::core::NamespaceResourceScope;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use tracing::Instrument;

use crate::{
    config::{self, TestConfig},
    error::Error,
    greeting, inject,
    policy::PolicyManager,
    probe::{self, Poller, ProbeResponse},
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Phases of a verification scenario.
///
/// Probes, policy deploys, and injection toggles interleave freely once the
/// ingress endpoint is ready; cleanup is reachable from every active state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScenarioState {
    Init,
    Ready,
    PolicyDeployed,
    InjectionToggled,
    Probed,
    Cleanup,
    Done,
}

impl ScenarioState {
    fn permits(self, next: ScenarioState) -> bool {
        use ScenarioState::*;
        matches!(
            (self, next),
            (Init, Ready)
                | (
                    Ready | PolicyDeployed | InjectionToggled | Probed,
                    PolicyDeployed | InjectionToggled | Probed,
                )
                | (
                    Init | Ready | PolicyDeployed | InjectionToggled | Probed,
                    Cleanup,
                )
                | (Cleanup, Done)
        )
    }
}

/// Context handed to a scenario body. Clones share the same underlying
/// scenario: its state cell and both policy managers.
#[derive(Clone)]
pub struct Scenario {
    client: kube::Client,
    http: reqwest::Client,
    config: TestConfig,
    /// Gateway resources deployed for every scenario.
    base: PolicyManager,
    /// Policies deployed by the scenario body.
    policies: PolicyManager,
    state: Arc<Mutex<ScenarioState>>,
}

impl Scenario {
    async fn connect() -> Result<Self, Error> {
        let (config, client) = config::load().await?;
        tracing::debug!(ns = %config.namespace, gateway = %config.gateway_url, "initialized cluster client");
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let base = PolicyManager::new(client.clone(), &config.namespace);
        let policies = PolicyManager::new(client.clone(), &config.namespace);
        Ok(Self {
            client,
            http,
            config,
            base,
            policies,
            state: Arc::new(Mutex::new(ScenarioState::Init)),
        })
    }

    /// Deploys the gateway resources every scenario routes through.
    async fn deploy_base(&self) -> Result<(), Error> {
        self.base
            .deploy(greeting::gateway(&self.config.namespace))
            .await?;
        self.base
            .deploy(greeting::virtual_service(
                &self.config.namespace,
                &self.config.workload,
            ))
            .await?;
        Ok(())
    }

    /// Blocks until the ingress endpoint serves traffic.
    async fn ready(&self) -> Result<(), Error> {
        self.advance(ScenarioState::Ready)?;
        Poller::readiness()
            .await_status(&self.http, &self.config.gateway_url, StatusCode::OK)
            .await?;
        Ok(())
    }

    pub fn gateway_url(&self) -> &str {
        &self.config.gateway_url
    }

    pub fn workload_url(&self) -> &str {
        &self.config.workload_url
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn workload(&self) -> &str {
        &self.config.workload
    }

    /// Issues one GET against the gateway and captures the response.
    pub async fn probe(&self, path: &str) -> Result<ProbeResponse, Error> {
        self.advance(ScenarioState::Probed)?;
        let url = probe::join_url(&self.config.gateway_url, path);
        let rsp = probe::get(&self.http, &url).await?;
        tracing::info!(%url, status = %rsp.status, "probed");
        Ok(rsp)
    }

    /// Probes the greeting API through the gateway.
    pub async fn probe_greeting(&self) -> Result<ProbeResponse, Error> {
        self.probe(greeting::GREETING_PATH).await
    }

    /// Waits for a deployed policy to become observable at the gateway.
    /// Policy propagation across the mesh is asynchronous; assertions must
    /// not run before the expected status is seen.
    pub async fn await_effect(
        &self,
        path: &str,
        expected: StatusCode,
    ) -> Result<ProbeResponse, Error> {
        let url = probe::join_url(&self.config.gateway_url, path);
        Poller::convergence()
            .await_status(&self.http, &url, expected)
            .await
    }

    /// Deploys a rule document from the rules directory.
    pub async fn deploy_rule_file(&self, name: &str) -> Result<(), Error> {
        self.advance(ScenarioState::PolicyDeployed)?;
        self.policies
            .deploy_file(&self.config.rules_dir, name)
            .await
    }

    /// Deploys a typed policy resource.
    pub async fn deploy_policy<K>(&self, obj: K) -> Result<K, Error>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + std::fmt::Debug
            + Serialize
            + DeserializeOwned,
    {
        self.advance(ScenarioState::PolicyDeployed)?;
        self.policies.deploy(obj).await
    }

    /// Tears down the policies this scenario's body deployed. The
    /// end-of-scenario cleanup then finds nothing left to do.
    pub async fn undeploy_policies(&self) -> Result<(), Error> {
        self.policies.undeploy_all().await
    }

    /// Flips sidecar injection on the workload; `readiness_url` is polled
    /// until the replacement instance serves.
    pub async fn set_injection(&self, enabled: bool, readiness_url: &str) -> Result<(), Error> {
        self.advance(ScenarioState::InjectionToggled)?;
        inject::set_injection(&self.client, &self.http, &self.config, enabled, readiness_url).await
    }

    fn advance(&self, next: ScenarioState) -> Result<(), Error> {
        let mut state = self.state.lock().expect("scenario state poisoned");
        if !state.permits(next) {
            return Err(Error::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        tracing::debug!(from = ?*state, to = ?next, "scenario transition");
        *state = next;
        Ok(())
    }

    /// Undeploys everything the scenario recorded, body policies first.
    /// Every manager is attempted even when an earlier teardown fails.
    async fn finish(&self) -> Result<(), Error> {
        self.advance(ScenarioState::Cleanup)?;
        let policies = self.policies.undeploy_all().await;
        let base = self.base.undeploy_all().await;
        self.advance(ScenarioState::Done)?;
        policies.and(base)
    }
}

/// Runs a verification scenario with guaranteed policy cleanup.
///
/// The gateway resources are deployed and the ingress endpoint
/// readiness-polled before the body runs. Every policy resource recorded
/// during the scenario is undeployed afterwards, whether the body returned
/// or panicked; a cleanup failure after a body failure is reported without
/// masking the original panic.
pub async fn with_scenario<F, Fut>(test: F)
where
    F: FnOnce(Scenario) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let _tracing = crate::init_tracing();

    let scenario = Scenario::connect()
        .await
        .expect("failed to initialize scenario context");

    tracing::trace!("spawning scenario body");
    let body = test(scenario.clone());
    let cleanup = scenario.clone();
    let res = tokio::spawn(
        async move {
            scenario
                .deploy_base()
                .await
                .expect("failed to deploy gateway resources");
            scenario
                .ready()
                .await
                .expect("ingress endpoint must become ready");
            body.await;
        }
        .instrument(tracing::info_span!("scenario", ns = %cleanup.namespace())),
    )
    .await;
    if res.is_err() {
        // Stop tracing so cleanup logging does not bury the failure output.
        drop(_tracing);
    }

    let cleaned = cleanup.finish().await;
    match res {
        Ok(()) => cleaned.expect("failed to undeploy policy resources"),
        Err(err) => {
            if let Err(error) = cleaned {
                eprintln!("cleanup failed after scenario failure: {error}");
            }
            std::panic::resume_unwind(err.into_panic());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ScenarioState::{self, *};

    const ACTIVE: [ScenarioState; 5] = [Init, Ready, PolicyDeployed, InjectionToggled, Probed];

    #[test]
    fn cleanup_is_reachable_from_every_active_state() {
        for state in ACTIVE {
            assert!(state.permits(Cleanup), "{state:?} must permit cleanup");
        }
    }

    #[test]
    fn operations_require_readiness() {
        assert!(Init.permits(Ready));
        assert!(!Init.permits(Probed));
        assert!(!Init.permits(PolicyDeployed));
        assert!(!Init.permits(InjectionToggled));
    }

    #[test]
    fn operations_interleave_once_ready() {
        for from in [Ready, PolicyDeployed, InjectionToggled, Probed] {
            for to in [PolicyDeployed, InjectionToggled, Probed] {
                assert!(from.permits(to), "{from:?} must permit {to:?}");
            }
        }
    }

    #[test]
    fn done_is_terminal() {
        assert!(Cleanup.permits(Done));
        for to in [Init, Ready, PolicyDeployed, InjectionToggled, Probed, Cleanup, Done] {
            assert!(!Done.permits(to), "Done must not permit {to:?}");
        }
    }

    #[test]
    fn cleanup_only_completes() {
        for to in ACTIVE {
            assert!(!Cleanup.permits(to), "Cleanup must not permit {to:?}");
        }
    }
}
