//! Scenario records: what to deploy, with which tool, and what to expect.
//!
//! One generic orchestrator runs every scenario; variation between
//! applications, build tools and cluster flavors is carried here as data.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use kverify_core::cluster::{container_ports, Container, ContainerPort, Exposure};
use kverify_core::predicate::{
    all_of, anything, contains_str, equal_to, has_item, has_size, property, some,
};
use kverify_core::{PollSchedule, Predicate, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::phase::PhaseKind;

/// Build tool driving the deployment plugin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildToolKind {
    Maven,
    Gradle,
}

impl BuildToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            BuildToolKind::Maven => "maven",
            BuildToolKind::Gradle => "gradle",
        }
    }
}

/// Capability flag distinguishing plain Kubernetes from OpenShift.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClusterFlavor {
    Kubernetes,
    OpenShift,
}

impl ClusterFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            ClusterFlavor::Kubernetes => "kubernetes",
            ClusterFlavor::OpenShift => "openshift",
        }
    }

    /// Prefix of plugin goals (`k8s:apply`) and tasks (`k8sApply`).
    pub fn goal_prefix(&self) -> &'static str {
        match self {
            ClusterFlavor::Kubernetes => "k8s",
            ClusterFlavor::OpenShift => "oc",
        }
    }

    /// Kind of the generated controller.
    pub fn workload_kind(&self) -> ResourceKind {
        match self {
            ClusterFlavor::Kubernetes => ResourceKind::Deployment,
            ClusterFlavor::OpenShift => ResourceKind::DeploymentConfig,
        }
    }

    /// Whether builds publish to an in-cluster `ImageStream`.
    pub fn has_image_streams(&self) -> bool {
        matches!(self, ClusterFlavor::OpenShift)
    }

    /// Whether the generator also emits a `Route`.
    pub fn has_routes(&self) -> bool {
        matches!(self, ClusterFlavor::OpenShift)
    }
}

/// One expected service port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortExpectation {
    pub name: String,
    pub port: i32,
    #[serde(default)]
    pub externally_routable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerPortExpectation {
    pub name: String,
    pub container_port: i32,
}

/// Properties one container of the workload must have. Unset fields are
/// not checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerExpectation {
    pub name: Option<String>,
    pub image_contains: Option<String>,
    pub port_count: Option<usize>,
    pub ports: Vec<ContainerPortExpectation>,
}

impl ContainerExpectation {
    pub fn predicate(&self) -> Predicate<Container> {
        let mut parts: Vec<Predicate<Container>> = Vec::new();
        if let Some(name) = &self.name {
            parts.push(property("name", |c: &Container| &c.name, equal_to(name.clone())));
        }
        if let Some(image) = &self.image_contains {
            parts.push(property("image", |c: &Container| &c.image, some(contains_str(image))));
        }
        if let Some(count) = self.port_count {
            parts.push(property("ports", container_ports, has_size(count)));
        }
        for port in &self.ports {
            let port_matches = all_of(vec![
                property(
                    "name",
                    |p: &ContainerPort| &p.name,
                    some(equal_to(port.name.clone())),
                ),
                property(
                    "containerPort",
                    |p: &ContainerPort| &p.container_port,
                    equal_to(port.container_port),
                ),
            ]);
            parts.push(property("ports", container_ports, has_item(port_matches)));
        }
        if parts.is_empty() {
            anything()
        } else {
            all_of(parts)
        }
    }
}

/// Chart the optional helm phase must produce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HelmChartExpectation {
    /// Version embedded in the chart archive name.
    pub version: String,
}

impl Default for HelmChartExpectation {
    fn default() -> Self {
        Self {
            version: "0.0.0-SNAPSHOT".to_string(),
        }
    }
}

/// What the verify and generate phases check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Expectations {
    pub ports: Vec<PortExpectation>,
    /// Total service ports; `ports.len()` when unset and `ports` is non-empty.
    pub port_count: Option<usize>,
    pub exposure: Exposure,
    /// Substring the node-port response body must contain.
    pub http_response: Option<String>,
    /// Startup milestones, in order.
    pub log_phrases: Vec<String>,
    pub forbidden_log_phrases: Vec<String>,
    pub replicas: i32,
    pub containers: Vec<ContainerExpectation>,
    /// Total workload containers; `containers.len()` when unset and
    /// `containers` is non-empty.
    pub container_count: Option<usize>,
    /// Manifest paths relative to the project; derived from the flavor when empty.
    pub manifests: Vec<PathBuf>,
    /// Set to run the helm phase and check the chart it writes.
    pub helm_chart: Option<HelmChartExpectation>,
}

impl Default for Expectations {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            port_count: None,
            exposure: Exposure::ClusterIp,
            http_response: None,
            log_phrases: Vec::new(),
            forbidden_log_phrases: Vec::new(),
            replicas: 1,
            containers: Vec::new(),
            container_count: None,
            manifests: Vec::new(),
            helm_chart: None,
        }
    }
}

impl Expectations {
    pub fn expected_port_count(&self) -> Option<usize> {
        self.port_count
            .or_else(|| (!self.ports.is_empty()).then_some(self.ports.len()))
    }

    pub fn expected_container_count(&self) -> Option<usize> {
        self.container_count
            .or_else(|| (!self.containers.is_empty()).then_some(self.containers.len()))
    }
}

/// Per-wait schedules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScenarioTimeouts {
    pub pod: PollSchedule,
    pub service: PollSchedule,
    pub workload: PollSchedule,
    pub log: PollSchedule,
    pub http: PollSchedule,
    pub undeploy: PollSchedule,
}

impl Default for ScenarioTimeouts {
    fn default() -> Self {
        Self {
            pod: PollSchedule::fixed_secs(60, 2),
            service: PollSchedule::fixed_secs(30, 1),
            workload: PollSchedule::fixed_secs(60, 2),
            log: PollSchedule::fixed_secs(40, 1),
            http: PollSchedule::fixed_secs(30, 1),
            undeploy: PollSchedule::fixed_secs(60, 2),
        }
    }
}

/// One application + build tool + cluster flavor combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioSpec {
    /// Application name; also the name of its service and workload.
    pub application: String,
    pub project_dir: PathBuf,
    pub build_tool: BuildToolKind,
    pub flavor: ClusterFlavor,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub expectations: Expectations,
    /// Maven profiles activated for every invocation.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Extra properties passed to every invocation.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub timeouts: ScenarioTimeouts,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ScenarioSpec {
    pub fn new(
        application: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        build_tool: BuildToolKind,
        flavor: ClusterFlavor,
    ) -> Self {
        Self {
            application: application.into(),
            project_dir: project_dir.into(),
            build_tool,
            flavor,
            namespace: default_namespace(),
            expectations: Expectations::default(),
            profiles: Vec::new(),
            properties: BTreeMap::new(),
            timeouts: ScenarioTimeouts::default(),
        }
    }

    pub fn with_expectations(mut self, expectations: Expectations) -> Self {
        self.expectations = expectations;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.push(profile.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Whether this scenario takes part in `phase`; the helm phase only runs
    /// when a chart is expected.
    pub fn runs_phase(&self, phase: PhaseKind) -> bool {
        match phase {
            PhaseKind::Helm => self.expectations.helm_chart.is_some(),
            _ => true,
        }
    }

    /// `app=<application>`, the label the generator puts on every object.
    pub fn selector(&self) -> kverify_core::Labels {
        let mut labels = kverify_core::Labels::new();
        labels.insert("app".to_string(), self.application.clone());
        labels
    }
}

impl fmt::Display for ScenarioSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.application,
            self.build_tool.name(),
            self.flavor.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, image: &str, ports: &[(&str, i32)]) -> Container {
        Container {
            name: name.into(),
            image: Some(image.into()),
            ports: Some(
                ports
                    .iter()
                    .map(|(n, p)| ContainerPort {
                        name: Some(n.to_string()),
                        container_port: *p,
                        protocol: Some("TCP".into()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_flavor_capabilities() {
        assert_eq!(ClusterFlavor::Kubernetes.workload_kind(), ResourceKind::Deployment);
        assert_eq!(ClusterFlavor::OpenShift.workload_kind(), ResourceKind::DeploymentConfig);
        assert!(ClusterFlavor::OpenShift.has_image_streams());
        assert!(!ClusterFlavor::Kubernetes.has_routes());
    }

    #[test]
    fn test_container_expectation_predicate() {
        let expectation = ContainerExpectation {
            name: Some("spring-boot".into()),
            image_contains: Some("sb-zero-config@sha256".into()),
            port_count: Some(3),
            ports: vec![ContainerPortExpectation {
                name: "http".into(),
                container_port: 8080,
            }],
        };
        let good = container(
            "spring-boot",
            "registry/sb-zero-config@sha256:abc",
            &[("http", 8080), ("prometheus", 9779), ("jolokia", 8778)],
        );
        let wrong_port = container(
            "spring-boot",
            "registry/sb-zero-config@sha256:abc",
            &[("http", 8081), ("prometheus", 9779), ("jolokia", 8778)],
        );
        let p = expectation.predicate();
        assert!(p.test(&good));
        assert!(!p.test(&wrong_port));
        assert!(ContainerExpectation::default().predicate().test(&wrong_port));
    }

    #[test]
    fn test_scenario_record_from_json_uses_defaults() {
        let spec: ScenarioSpec = serde_json::from_str(
            r#"{
                "application": "vertx-simplest",
                "project_dir": "projects-to-be-tested/maven/vertx/simplest",
                "build_tool": "maven",
                "flavor": "openshift",
                "expectations": {"log_phrases": ["Succeeded in deploying verticle"]}
            }"#,
        )
        .unwrap();

        assert_eq!(spec.namespace, "default");
        assert_eq!(spec.expectations.replicas, 1);
        assert_eq!(spec.expectations.exposure, Exposure::ClusterIp);
        assert_eq!(spec.timeouts, ScenarioTimeouts::default());
        assert_eq!(spec.to_string(), "vertx-simplest (maven, openshift)");
        assert_eq!(spec.selector().get("app").map(String::as_str), Some("vertx-simplest"));
        assert!(!spec.runs_phase(PhaseKind::Helm));
        assert!(spec.runs_phase(PhaseKind::Undeploy));
    }

    #[test]
    fn test_counts_derive_from_listed_expectations() {
        let mut expectations = Expectations::default();
        assert_eq!(expectations.expected_port_count(), None);
        assert_eq!(expectations.expected_container_count(), None);

        expectations.ports.push(PortExpectation {
            name: "http".into(),
            port: 8080,
            externally_routable: false,
        });
        expectations.containers.push(ContainerExpectation::default());
        assert_eq!(expectations.expected_port_count(), Some(1));
        assert_eq!(expectations.expected_container_count(), Some(1));

        expectations.port_count = Some(3);
        assert_eq!(expectations.expected_port_count(), Some(3));
    }

    #[test]
    fn test_helm_chart_opt_in_from_json() {
        let spec: ScenarioSpec = serde_json::from_str(
            r#"{
                "application": "sb-zero-config",
                "project_dir": "gradle/spring-boot/zero-config",
                "build_tool": "gradle",
                "flavor": "openshift",
                "expectations": {"helm_chart": {}}
            }"#,
        )
        .unwrap();

        assert!(spec.runs_phase(PhaseKind::Helm));
        assert_eq!(
            spec.expectations.helm_chart,
            Some(HelmChartExpectation {
                version: "0.0.0-SNAPSHOT".into()
            })
        );
    }
}
