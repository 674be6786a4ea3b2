use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use kube::{
    api::{Api, DeleteParams, DynamicObject, PostParams},
    core::{ApiResource, GroupVersionKind, NamespaceResourceScope},
    discovery, ResourceExt,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Error;

/// Placeholder token in rule documents replaced with the active namespace.
pub const NAMESPACE_TOKEN: &str = "TARGET_NAMESPACE";

/// Identifies a deployed policy resource for later teardown.
#[derive(Clone, Debug)]
struct PolicyHandle {
    api_resource: ApiResource,
    name: String,
}

/// Deploys mesh policy resources and guarantees their teardown.
///
/// The handle list is shared between clones, so the harness can undeploy
/// whatever a scenario body recorded even when the body panicked.
#[derive(Clone)]
pub struct PolicyManager {
    client: kube::Client,
    namespace: String,
    handles: Arc<Mutex<Vec<PolicyHandle>>>,
}

impl PolicyManager {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Deploys every document in a rule file from the rules directory.
    pub async fn deploy_file(&self, dir: &Path, name: &str) -> Result<(), Error> {
        let path = dir.join(name);
        tracing::debug!(path = %path.display(), "reading rule file");
        let content = fs::read_to_string(&path)?;
        self.deploy_yaml(&content).await
    }

    /// Deploys every document in a multi-document YAML string. The document
    /// kinds are resolved against API discovery, so the manager handles any
    /// policy kind the cluster serves.
    pub async fn deploy_yaml(&self, content: &str) -> Result<(), Error> {
        for (gvk, obj) in parse_documents(content, &self.namespace)? {
            let name = obj.name_any();
            let (ar, _caps) = discovery::oneshot::pinned_kind(&self.client, &gvk)
                .await
                .map_err(|source| Error::ResourceDeploy {
                    kind: gvk.kind.clone(),
                    name: name.clone(),
                    source,
                })?;
            let api: Api<DynamicObject> =
                Api::namespaced_with(self.client.clone(), &self.namespace, &ar);
            tracing::debug!(ns = %self.namespace, kind = %gvk.kind, %name, "deploying policy");
            api.create(&PostParams::default(), &obj)
                .await
                .map_err(|source| Error::ResourceDeploy {
                    kind: gvk.kind.clone(),
                    name: name.clone(),
                    source,
                })?;
            self.record(PolicyHandle {
                api_resource: ar,
                name,
            });
        }
        Ok(())
    }

    /// Deploys a typed policy resource and records it for teardown.
    pub async fn deploy<K>(&self, obj: K) -> Result<K, Error>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + std::fmt::Debug
            + Serialize
            + DeserializeOwned,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = obj.name_any();
        tracing::debug!(ns = %self.namespace, kind = %K::kind(&()), %name, "deploying policy");
        let created =
            api.create(&PostParams::default(), &obj)
                .await
                .map_err(|source| Error::ResourceDeploy {
                    kind: K::kind(&()).to_string(),
                    name: name.clone(),
                    source,
                })?;
        self.record(PolicyHandle {
            api_resource: ApiResource::erase::<K>(&()),
            name,
        });
        Ok(created)
    }

    /// Deletes every recorded resource, newest first. Resources that are
    /// already gone are skipped, so calling this twice is a no-op; every
    /// remaining handle is attempted even when an earlier delete fails, and
    /// the first hard failure is returned.
    pub async fn undeploy_all(&self) -> Result<(), Error> {
        let handles: Vec<PolicyHandle> = {
            let mut list = self.handles.lock().expect("policy handle list poisoned");
            list.drain(..).rev().collect()
        };
        if handles.is_empty() {
            tracing::trace!(ns = %self.namespace, "no policy resources to undeploy");
            return Ok(());
        }

        let mut first_failure = None;
        for handle in handles {
            let api: Api<DynamicObject> =
                Api::namespaced_with(self.client.clone(), &self.namespace, &handle.api_resource);
            match api.delete(&handle.name, &DeleteParams::default()).await {
                Ok(_) => {
                    tracing::debug!(
                        ns = %self.namespace,
                        kind = %handle.api_resource.kind,
                        name = %handle.name,
                        "undeployed policy"
                    );
                }
                Err(kube::Error::Api(ref rsp)) if rsp.code == 404 => {
                    tracing::debug!(name = %handle.name, "policy already gone");
                }
                Err(error) => {
                    tracing::warn!(name = %handle.name, %error, "failed to undeploy policy");
                    if first_failure.is_none() {
                        first_failure = Some(error);
                    }
                }
            }
        }
        match first_failure {
            None => Ok(()),
            Some(error) => Err(error.into()),
        }
    }

    fn record(&self, handle: PolicyHandle) {
        self.handles
            .lock()
            .expect("policy handle list poisoned")
            .push(handle);
    }
}

/// Splits a multi-document YAML string into deployable objects, substituting
/// the namespace placeholder first.
fn parse_documents(
    content: &str,
    namespace: &str,
) -> Result<Vec<(GroupVersionKind, DynamicObject)>, Error> {
    let content = content.replace(NAMESPACE_TOKEN, namespace);
    let mut documents = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&content) {
        let value = serde_yaml::Value::deserialize(doc).map_err(invalid)?;
        if value.is_null() {
            continue;
        }
        let value = serde_json::to_value(&value).map_err(|err| Error::InvalidPolicy {
            reason: err.to_string(),
        })?;
        let obj: DynamicObject =
            serde_json::from_value(value).map_err(|err| Error::InvalidPolicy {
                reason: err.to_string(),
            })?;
        let types = obj.types.clone().ok_or_else(|| Error::InvalidPolicy {
            reason: format!("document {} is missing apiVersion/kind", obj.name_any()),
        })?;
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), types.api_version.clone()),
        };
        let gvk = GroupVersionKind {
            group,
            version,
            kind: types.kind.clone(),
        };
        documents.push((gvk, obj));
    }
    if documents.is_empty() {
        return Err(Error::InvalidPolicy {
            reason: "no policy documents found".to_string(),
        });
    }
    Ok(documents)
}

fn invalid(err: serde_yaml::Error) -> Error {
    Error::InvalidPolicy {
        reason: err.to_string(),
    }
}
