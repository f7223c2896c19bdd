//! Cluster client backed by the Kubernetes API through `kube`.
//!
//! Core kinds go through typed `k8s-openapi` APIs; OpenShift kinds have no
//! upstream types and use `DynamicObject`. Every object is handed to callers
//! as JSON and decoded into the views in [`super::model`].

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ListParams, LogParams};
use kube::config::KubeConfigOptions;
use kube::core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{render_selector, ClusterClient, Labels, ResourceKind};
use crate::error::ClusterError;

/// Status message of a 404 for a kind the API server does not serve.
const UNSERVED_KIND_MESSAGE: &str = "the server could not find the requested resource";

/// Configuration for [`KubeClusterClient`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Kubeconfig context; the current context when unset.
    pub context: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            context: std::env::var("KVERIFY_CLUSTER_CONTEXT").ok(),
        }
    }
}

#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the kubeconfig (or in-cluster) settings, switching to
    /// the configured context when one is set.
    pub async fn connect(config: &ClusterConfig) -> Result<Self, ClusterError> {
        let kube_config = match &config.context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..Default::default()
                };
                Config::from_kubeconfig(&options).await.map_err(|e| {
                    ClusterError::Client(format!("kubeconfig context {context}: {e}"))
                })?
            }
            None => Config::infer()
                .await
                .map_err(|e| ClusterError::Client(e.to_string()))?,
        };
        debug!(cluster_url = %kube_config.cluster_url, "Connecting to cluster");
        let client =
            Client::try_from(kube_config).map_err(|e| ClusterError::Client(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn dynamic(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &api_resource(kind))
    }
}

/// API coordinates for kinds reached through `DynamicObject`.
fn api_resource(kind: ResourceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(kind.group(), "v1", &kind.to_string());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

/// Map a client failure onto the error taxonomy.
///
/// A 404 only means "not there yet" when the status names the object; a 404
/// for the kind itself, or one without a parseable status, is fatal.
pub(crate) fn classify(
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    err: kube::Error,
) -> ClusterError {
    match err {
        kube::Error::Api(ErrorResponse {
            code: 404,
            reason,
            message,
            ..
        }) => {
            if reason == "NotFound" && !message.contains(UNSERVED_KIND_MESSAGE) {
                ClusterError::NotFound {
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            } else {
                ClusterError::UnknownKind {
                    kind: kind.to_string(),
                    reason: message,
                }
            }
        }
        kube::Error::Api(response) if matches!(response.code, 401 | 403) => {
            ClusterError::Forbidden {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                reason: response.message,
            }
        }
        kube::Error::Api(response) if response.code == 429 || response.code >= 500 => {
            ClusterError::Unavailable(format!("{} {}", response.code, response.message))
        }
        kube::Error::Api(response) => ClusterError::Client(format!(
            "{} {}: {}",
            response.code, response.reason, response.message
        )),
        kube::Error::HyperError(e) => ClusterError::Unavailable(e.to_string()),
        kube::Error::Service(e) => ClusterError::Unavailable(e.to_string()),
        kube::Error::SerdeError(e) => ClusterError::Decode {
            kind: kind.to_string(),
            reason: e.to_string(),
        },
        other => ClusterError::Client(other.to_string()),
    }
}

fn to_value<K: Serialize>(kind: ResourceKind, object: &K) -> Result<Value, ClusterError> {
    serde_json::to_value(object).map_err(|e| ClusterError::Decode {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

async fn get_object<K>(
    api: Api<K>,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> Result<Value, ClusterError>
where
    K: Clone + DeserializeOwned + Serialize + fmt::Debug,
{
    let object = api
        .get(name)
        .await
        .map_err(|e| classify(kind, namespace, name, e))?;
    to_value(kind, &object)
}

async fn list_objects<K>(
    api: Api<K>,
    kind: ResourceKind,
    namespace: &str,
    selector: &Labels,
) -> Result<Vec<Value>, ClusterError>
where
    K: Clone + DeserializeOwned + Serialize + fmt::Debug,
{
    let rendered = render_selector(selector);
    let params = if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&rendered)
    };
    let list = api
        .list(&params)
        .await
        .map_err(|e| classify(kind, namespace, &rendered, e))?;
    list.items.iter().map(|o| to_value(kind, o)).collect()
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Value, ClusterError> {
        trace!(%kind, namespace, name, "get");
        let client = self.client.clone();
        match kind {
            ResourceKind::Pod => {
                let api = Api::<Pod>::namespaced(client, namespace);
                get_object(api, kind, namespace, name).await
            }
            ResourceKind::Service => {
                let api = Api::<Service>::namespaced(client, namespace);
                get_object(api, kind, namespace, name).await
            }
            ResourceKind::Deployment => {
                let api = Api::<Deployment>::namespaced(client, namespace);
                get_object(api, kind, namespace, name).await
            }
            ResourceKind::DeploymentConfig | ResourceKind::ImageStream | ResourceKind::Route => {
                get_object(self.dynamic(kind, namespace), kind, namespace, name).await
            }
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<Value>, ClusterError> {
        trace!(%kind, namespace, selector = %render_selector(selector), "list");
        let client = self.client.clone();
        match kind {
            ResourceKind::Pod => {
                let api = Api::<Pod>::namespaced(client, namespace);
                list_objects(api, kind, namespace, selector).await
            }
            ResourceKind::Service => {
                let api = Api::<Service>::namespaced(client, namespace);
                list_objects(api, kind, namespace, selector).await
            }
            ResourceKind::Deployment => {
                let api = Api::<Deployment>::namespaced(client, namespace);
                list_objects(api, kind, namespace, selector).await
            }
            ResourceKind::DeploymentConfig | ResourceKind::ImageStream | ResourceKind::Route => {
                list_objects(self.dynamic(kind, namespace), kind, namespace, selector).await
            }
        }
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, ClusterError> {
        trace!(namespace, pod, "logs");
        Api::<Pod>::namespaced(self.client.clone(), namespace)
            .logs(pod, &LogParams::default())
            .await
            .map_err(|e| classify(ResourceKind::Pod, namespace, pod, e))
    }
}
