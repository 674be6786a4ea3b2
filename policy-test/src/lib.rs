#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod greeting;
pub mod inject;
pub mod policy;
pub mod probe;
pub mod scenario;

pub use self::{
    config::TestConfig,
    error::Error,
    policy::PolicyManager,
    probe::{Poller, ProbeResponse},
    scenario::{with_scenario, Scenario, ScenarioState},
};

pub(crate) fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "mesh_policy_test=trace,info".parse().unwrap()),
            )
            .finish(),
    )
}
