//! Cluster client seam and typed awaits built on it.
//!
//! The client is an external collaborator: the harness only reads objects,
//! lists them by label and fetches pod logs. [`KubeClusterClient`] talks to
//! the API server through `kube`; tests use [`crate::fakes::FakeCluster`].

pub mod kube_client;
pub mod model;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::await_engine::{await_absent, await_condition, Condition, PollSchedule, Satisfied};
use crate::error::ClusterError;
use crate::predicate::Predicate;

pub use kube_client::{ClusterConfig, KubeClusterClient};
pub use model::{
    container_ports, Container, ContainerPort, Exposure, ImageStream, Named, ObjectMeta, Pod,
    PodExt, Service, ServiceExt, ServicePort, Workload,
};

/// Object kinds the harness inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Pod,
    Service,
    Deployment,
    DeploymentConfig,
    ImageStream,
    Route,
}

impl ResourceKind {
    /// API group serving the kind; empty for the core group.
    pub fn group(&self) -> &'static str {
        match self {
            ResourceKind::Pod | ResourceKind::Service => "",
            ResourceKind::Deployment => "apps",
            ResourceKind::DeploymentConfig => "apps.openshift.io",
            ResourceKind::ImageStream => "image.openshift.io",
            ResourceKind::Route => "route.openshift.io",
        }
    }

    /// Lower-case plural used in API paths.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::Service => "services",
            ResourceKind::Deployment => "deployments",
            ResourceKind::DeploymentConfig => "deploymentconfigs",
            ResourceKind::ImageStream => "imagestreams",
            ResourceKind::Route => "routes",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Label selector, rendered as `k=v,k2=v2`.
pub type Labels = BTreeMap<String, String>;

pub fn render_selector(selector: &Labels) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Read access to a cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one object; `ClusterError::NotFound` when it does not exist.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<serde_json::Value, ClusterError>;

    /// List objects of `kind` whose labels include `selector`.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<serde_json::Value>, ClusterError>;

    /// Accumulated log text of a pod's main container.
    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, ClusterError>;
}

fn decode<T: DeserializeOwned>(
    kind: ResourceKind,
    value: serde_json::Value,
) -> Result<T, ClusterError> {
    serde_json::from_value(value).map_err(|e| ClusterError::Decode {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Fetch and decode one named object.
pub async fn get_typed<T: DeserializeOwned>(
    client: &dyn ClusterClient,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> Result<T, ClusterError> {
    decode(kind, client.get(kind, namespace, name).await?)
}

/// Fetch every object matching `selector` and return the first that
/// satisfies `wanted`, or the first listed when none does.
///
/// An empty list is reported as `NotFound` so pollers keep waiting.
pub async fn select_matching<T: DeserializeOwned>(
    client: &dyn ClusterClient,
    kind: ResourceKind,
    namespace: &str,
    selector: &Labels,
    wanted: &Predicate<T>,
) -> Result<T, ClusterError> {
    let mut fallback = None;
    for item in client.list(kind, namespace, selector).await? {
        let candidate: T = decode(kind, item)?;
        if wanted.test(&candidate) {
            return Ok(candidate);
        }
        fallback.get_or_insert(candidate);
    }
    fallback.ok_or_else(|| ClusterError::NotFound {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: render_selector(selector),
    })
}

/// Address of one named object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Poll a named object until `condition` holds.
pub async fn await_resource<T>(
    client: &dyn ClusterClient,
    target: &ResourceRef,
    condition: &Condition<T>,
) -> crate::Result<Satisfied<T>>
where
    T: DeserializeOwned + fmt::Debug,
{
    await_condition(
        move || get_typed::<T>(client, target.kind, &target.namespace, &target.name),
        condition,
    )
    .await
    .map_err(|e| e.into_verify_error(target.to_string()))
}

/// Poll the objects matching `selector` until one of them satisfies
/// `condition`.
pub async fn await_selected<T>(
    client: &dyn ClusterClient,
    kind: ResourceKind,
    namespace: &str,
    selector: &Labels,
    condition: &Condition<T>,
) -> crate::Result<Satisfied<T>>
where
    T: DeserializeOwned + fmt::Debug,
{
    await_condition(
        move || select_matching::<T>(client, kind, namespace, selector, &condition.predicate),
        condition,
    )
    .await
    .map_err(|e| e.into_verify_error(format!("{kind} {namespace}/{}", render_selector(selector))))
}

/// Poll until a named object is gone.
pub async fn await_deleted(
    client: &dyn ClusterClient,
    target: &ResourceRef,
    schedule: PollSchedule,
) -> crate::Result<std::time::Duration> {
    let fetch = move || async move {
        match client.get(target.kind, &target.namespace, &target.name).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    };
    await_absent(fetch, schedule)
        .await
        .map(|done| done.elapsed)
        .map_err(|e| e.into_verify_error(format!("deletion of {target}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_selector_is_sorted() {
        let mut sel = Labels::new();
        sel.insert("provider".into(), "jkube".into());
        sel.insert("app".into(), "demo".into());
        assert_eq!(render_selector(&sel), "app=demo,provider=jkube");
    }

    #[test]
    fn test_resource_ref_display() {
        let r = ResourceRef::new(ResourceKind::DeploymentConfig, "ns", "vertx-simplest");
        assert_eq!(r.to_string(), "DeploymentConfig ns/vertx-simplest");
        assert_eq!(r.kind.group(), "apps.openshift.io");
        assert_eq!(r.kind.plural(), "deploymentconfigs");
    }
}
