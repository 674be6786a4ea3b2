use std::time::Duration;

use thiserror::Error;

use crate::{probe::LastObservation, scenario::ScenarioState};

/// Failures surfaced by the verification workflow. All of them are fatal to
/// the scenario that hit them; policy cleanup still runs.
#[derive(Debug, Error)]
pub enum Error {
    /// The expected condition was never observed within the bound.
    #[error("timed out after {timeout:?} waiting for {condition}; last observed: {last}")]
    PollTimeout {
        condition: String,
        timeout: Duration,
        last: LastObservation,
    },

    /// The cluster rejected a policy document.
    #[error("cluster rejected {kind} {name}: {source}")]
    ResourceDeploy {
        kind: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// No running instance matched the workload.
    #[error("no running pod found for workload {workload} in namespace {namespace}")]
    InstanceNotFound { workload: String, namespace: String },

    /// A policy document could not be parsed into a cluster resource.
    #[error("invalid policy document: {reason}")]
    InvalidPolicy { reason: String },

    /// A scenario operation was attempted in the wrong state.
    #[error("illegal scenario transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ScenarioState,
        to: ScenarioState,
    },

    /// A watch on cluster state failed before the condition resolved.
    #[error("cluster watch failed: {message}")]
    Watch { message: String },

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    KubeConfig(#[from] kube::config::InferConfigError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
