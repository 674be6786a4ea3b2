use std::path::PathBuf;

use crate::error::Error;

/// Environment-derived test configuration.
///
/// Defaults assume a local cluster with the ingress gateway and the direct
/// workload route port-forwarded to localhost.
#[derive(Clone, Debug)]
pub struct TestConfig {
    /// Base URL of the mesh ingress gateway.
    pub gateway_url: String,
    /// Direct route to the workload, bypassing the gateway.
    pub workload_url: String,
    /// Namespace holding the workload and the policy resources.
    pub namespace: String,
    /// Name of the workload under test.
    pub workload: String,
    /// Directory holding the policy rule documents.
    pub rules_dir: PathBuf,
}

const DEFAULT_RULES_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/rules");

/// Reads the configuration and connects the cluster client.
///
/// The namespace falls back to the kubeconfig's default namespace when
/// `MESH_TEST_NAMESPACE` is not set.
pub async fn load() -> Result<(TestConfig, kube::Client), Error> {
    let kube_config = kube::Config::infer().await?;
    let namespace = std::env::var("MESH_TEST_NAMESPACE")
        .unwrap_or_else(|_| kube_config.default_namespace.clone());
    let client = kube::Client::try_from(kube_config)?;

    let config = TestConfig {
        gateway_url: env_or("MESH_TEST_GATEWAY_URL", "http://localhost:8080"),
        workload_url: env_or("MESH_TEST_WORKLOAD_URL", "http://localhost:8081"),
        namespace,
        workload: env_or("MESH_TEST_WORKLOAD", "greeting"),
        rules_dir: std::env::var("MESH_TEST_RULES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_RULES_DIR)),
    };
    tracing::debug!(?config, "loaded test configuration");
    Ok((config, client))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
