//! Typed views of the cluster objects the harness inspects.
//!
//! Core objects are the `k8s-openapi` types. A `Deployment` and an OpenShift
//! `DeploymentConfig` share the [`Workload`] view; image streams have no
//! upstream type, so [`ImageStream`] models the status tags only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Pod, PodTemplateSpec, Service, ServicePort,
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

static NO_LABELS: BTreeMap<String, String> = BTreeMap::new();
static NO_CONTAINERS: Vec<Container> = Vec::new();
static NO_SERVICE_PORTS: Vec<ServicePort> = Vec::new();
static NO_CONTAINER_PORTS: Vec<ContainerPort> = Vec::new();

/// Anything with object metadata.
pub trait Named {
    fn metadata(&self) -> &ObjectMeta;

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        self.metadata().labels.as_ref().unwrap_or(&NO_LABELS)
    }
}

macro_rules! impl_named {
    ($($ty:ty),*) => {
        $(impl Named for $ty {
            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }
        })*
    };
}

impl_named!(Pod, Service, Workload, ImageStream);

fn template_containers(template: &PodTemplateSpec) -> &Vec<Container> {
    template
        .spec
        .as_ref()
        .map(|s| &s.containers)
        .unwrap_or(&NO_CONTAINERS)
}

/// Declared ports of a container, empty when unset.
pub fn container_ports(container: &Container) -> &Vec<ContainerPort> {
    container.ports.as_ref().unwrap_or(&NO_CONTAINER_PORTS)
}

// ---------------------------------------------------------------------------
// Pods
// ---------------------------------------------------------------------------

/// Readiness and container access on a [`Pod`].
pub trait PodExt {
    /// `Running` with every container reporting ready.
    fn is_ready(&self) -> bool;

    fn containers(&self) -> &Vec<Container>;
}

impl PodExt for Pod {
    fn is_ready(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        let statuses = status.container_statuses.as_deref().unwrap_or_default();
        status.phase.as_deref() == Some("Running")
            && !statuses.is_empty()
            && statuses.iter().all(|c| c.ready)
    }

    fn containers(&self) -> &Vec<Container> {
        self.spec
            .as_ref()
            .map(|s| &s.containers)
            .unwrap_or(&NO_CONTAINERS)
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// How a service is reachable. The two models are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exposure {
    /// Internal-only virtual IP.
    ClusterIp,
    /// Externally routable through a port on every node.
    NodePort,
}

/// Port and exposure access on a [`Service`].
pub trait ServiceExt {
    fn service_type(&self) -> Option<&str>;

    fn ports(&self) -> &Vec<ServicePort>;

    /// Exposure model, defaulting to cluster-IP as the API server does.
    fn exposure(&self) -> Option<Exposure> {
        match self.service_type() {
            None | Some("ClusterIP") => Some(Exposure::ClusterIp),
            Some("NodePort") => Some(Exposure::NodePort),
            Some(_) => None,
        }
    }

    fn port_named(&self, name: &str) -> Option<&ServicePort> {
        self.ports()
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
    }
}

impl ServiceExt for Service {
    fn service_type(&self) -> Option<&str> {
        self.spec.as_ref().and_then(|s| s.type_.as_deref())
    }

    fn ports(&self) -> &Vec<ServicePort> {
        self.spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .unwrap_or(&NO_SERVICE_PORTS)
    }
}

// ---------------------------------------------------------------------------
// Workloads (Deployment / DeploymentConfig)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkloadSpec {
    pub replicas: Option<i32>,
    pub template: PodTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkloadStatus {
    pub replicas: Option<i32>,
    pub ready_replicas: Option<i32>,
    pub available_replicas: Option<i32>,
}

/// A `Deployment` or an OpenShift `DeploymentConfig`; both share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Workload {
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: WorkloadSpec,
    pub status: WorkloadStatus,
}

impl Workload {
    /// Desired replicas; the API server defaults an unset count to 1.
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    pub fn containers(&self) -> &Vec<Container> {
        template_containers(&self.spec.template)
    }

    pub fn is_available(&self) -> bool {
        self.status.available_replicas.unwrap_or(0) >= self.replicas()
    }
}

// ---------------------------------------------------------------------------
// Image streams (OpenShift)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageStreamTag {
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageStreamStatus {
    pub tags: Vec<ImageStreamTag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageStream {
    pub metadata: ObjectMeta,
    pub status: ImageStreamStatus,
}

impl ImageStream {
    /// Status tags in the order the API server reports them.
    pub fn tag_names(&self) -> Vec<String> {
        self.status.tags.iter().map(|t| t.tag.clone()).collect()
    }

    pub fn first_tag(&self) -> Option<&str> {
        self.status.tags.first().map(|t| t.tag.as_str())
    }
}
