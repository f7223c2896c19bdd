//! Phase work against a real build tool and cluster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kverify_core::cluster::{Exposure, ImageStream, Named, Pod, PodExt, Service, Workload};
use kverify_core::predicate::{contains_str, equal_to, has_item, has_size};
use kverify_core::{
    assert_absent, await_deleted, await_resource, await_selected, match_ordered, AssertionChain,
    CapturedLog, ClusterClient, Condition, HttpProbe, LogAssertion, PodLog, Predicate,
    ResourceKind, ResourceRef,
};
use tracing::{debug, info};

use crate::manifests::{check_helm_chart, check_manifests};
use crate::phase::PhaseKind;
use crate::pipeline::ScenarioPhases;
use crate::runner::{BuildInvocation, BuildResult, BuildTool};
use crate::spec::ScenarioSpec;

/// Tag every OpenShift build must publish.
pub const IMAGE_TAG: &str = "latest";

/// Build-tool goals plus cluster checks for each phase.
pub struct DefaultPhases {
    cluster: Arc<dyn ClusterClient>,
    build_tool: Arc<dyn BuildTool>,
    node_host: String,
}

impl DefaultPhases {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        build_tool: Arc<dyn BuildTool>,
        node_host: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            build_tool,
            node_host: node_host.into(),
        }
    }

    async fn invoke(&self, invocation: BuildInvocation) -> kverify_core::Result<BuildResult> {
        info!(goals = ?invocation.goals, tool = invocation.tool.name(), "Invoking build tool");
        let result = self.build_tool.invoke(&invocation).await?;
        debug!(
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Build tool returned"
        );
        result.check(&invocation)
    }

    async fn generate(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        self.invoke(BuildInvocation::for_goal(spec, PhaseKind::Generate.goal()))
            .await?;
        check_manifests(spec)?;
        Ok(())
    }

    async fn helm(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        let Some(chart) = &spec.expectations.helm_chart else {
            return Ok(());
        };
        self.invoke(BuildInvocation::for_goal(spec, PhaseKind::Helm.goal()))
            .await?;
        let files = check_helm_chart(spec, chart)?;
        debug!(files = files.len(), "Helm chart written");
        Ok(())
    }

    async fn build(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        self.invoke(BuildInvocation::for_goal(spec, PhaseKind::Build.goal()))
            .await?;
        if spec.flavor.has_image_streams() {
            self.check_image_stream(spec).await?;
        }
        Ok(())
    }

    /// Wait for the image stream to report tags, then require the first one
    /// to be [`IMAGE_TAG`].
    async fn check_image_stream(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        let target =
            ResourceRef::new(ResourceKind::ImageStream, &spec.namespace, &spec.application);
        let condition = Condition::new(
            Predicate::new("at least one status tag", |s: &ImageStream| {
                s.first_tag().is_some()
            }),
            spec.timeouts.workload,
        );
        let stream = await_resource::<ImageStream>(self.cluster.as_ref(), &target, &condition)
            .await?
            .value;
        AssertionChain::of(ResourceKind::ImageStream, stream)
            .assert_first_tag(equal_to(IMAGE_TAG.to_string()))?;
        Ok(())
    }

    async fn apply(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        self.invoke(BuildInvocation::for_goal(spec, PhaseKind::Apply.goal()))
            .await?;
        Ok(())
    }

    async fn verify(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        let pod = self.verify_pod(spec).await?;
        self.verify_service(spec).await?;
        self.verify_workload(spec).await?;
        self.verify_goal_log(spec).await?;
        info!(pod = pod.name(), "Scenario verified");
        Ok(())
    }

    /// A ready pod labelled with the application, whose log reaches every
    /// startup milestone.
    async fn verify_pod(&self, spec: &ScenarioSpec) -> kverify_core::Result<Pod> {
        let ready = Condition::new(
            Predicate::new("a running pod with all containers ready", Pod::is_ready),
            spec.timeouts.pod,
        );
        let pod = await_selected::<Pod>(
            self.cluster.as_ref(),
            ResourceKind::Pod,
            &spec.namespace,
            &spec.selector(),
            &ready,
        )
        .await?
        .value;
        AssertionChain::of(ResourceKind::Pod, pod.clone()).assert_ready()?;

        let expectations = &spec.expectations;
        if !expectations.log_phrases.is_empty() || !expectations.forbidden_log_phrases.is_empty() {
            let source = PodLog::new(Arc::clone(&self.cluster), &spec.namespace, pod.name());
            let assertion = LogAssertion::new(
                expectations.log_phrases.iter().cloned(),
                spec.timeouts.log.timeout(),
            )?
            .with_schedule(spec.timeouts.log);
            let matched = match_ordered(&source, &assertion).await?;
            debug!(
                attempts = matched.attempts,
                elapsed_ms = matched.elapsed.as_millis() as u64,
                "Startup log matched"
            );
            assert_absent(&matched.captured, &expectations.forbidden_log_phrases)?;
        }
        Ok(pod)
    }

    async fn verify_service(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        let target = ResourceRef::new(ResourceKind::Service, &spec.namespace, &spec.application);
        let exists = Condition::new(
            Predicate::new("service exists", |_: &Service| true),
            spec.timeouts.service,
        );
        let service = await_resource::<Service>(self.cluster.as_ref(), &target, &exists)
            .await?
            .value;

        let expectations = &spec.expectations;
        let chain = AssertionChain::of(ResourceKind::Service, service);
        if let Some(count) = expectations.expected_port_count() {
            chain.assert_ports(has_size(count))?;
        }
        for port in &expectations.ports {
            chain.assert_port(&port.name, port.port, port.externally_routable)?;
        }
        match expectations.exposure {
            Exposure::ClusterIp => chain.assert_is_cluster_ip()?,
            Exposure::NodePort => chain.assert_is_node_port()?,
        };

        if let Some(body) = &expectations.http_response {
            let port_name = expectations
                .ports
                .iter()
                .find(|p| p.externally_routable)
                .or_else(|| expectations.ports.first())
                .map(|p| p.name.as_str())
                .unwrap_or("http");
            let probe = HttpProbe::new(&self.node_host, spec.timeouts.http)?;
            chain
                .assert_node_port_response(&probe, port_name, contains_str(body))
                .await?;
        }
        Ok(())
    }

    async fn verify_workload(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        let kind = spec.flavor.workload_kind();
        let target = ResourceRef::new(kind, &spec.namespace, &spec.application);
        let available = Condition::new(
            Predicate::new("available replicas", Workload::is_available),
            spec.timeouts.workload,
        );
        let workload = await_resource::<Workload>(self.cluster.as_ref(), &target, &available)
            .await?
            .value;

        let chain = AssertionChain::of(kind, workload);
        chain.assert_replicas(equal_to(spec.expectations.replicas))?;
        if let Some(count) = spec.expectations.expected_container_count() {
            chain.assert_containers(has_size(count))?;
        }
        for container in &spec.expectations.containers {
            chain.assert_containers(has_item(container.predicate()))?;
        }
        Ok(())
    }

    /// Run the log goal without following and match its captured output.
    async fn verify_goal_log(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        let invocation = BuildInvocation::for_goal(spec, PhaseKind::Verify.goal())
            .with_property("jkube.log.follow", "false");
        let origin = format!("{} output", invocation.goals.join(" "));
        let result = self.invoke(invocation).await?;

        let expectations = &spec.expectations;
        if !expectations.log_phrases.is_empty() {
            let captured = CapturedLog::new(origin, result.stdout.clone());
            // captured output is complete; a short deadline is enough
            let phrases = expectations.log_phrases.iter().cloned();
            let assertion = LogAssertion::new(phrases, Duration::from_secs(1))?;
            match_ordered(&captured, &assertion).await?;
        }
        assert_absent(&result.stdout, &expectations.forbidden_log_phrases)
    }

    async fn undeploy(&self, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        self.invoke(BuildInvocation::for_goal(spec, PhaseKind::Undeploy.goal()))
            .await?;
        for kind in [ResourceKind::Service, spec.flavor.workload_kind()] {
            let target = ResourceRef::new(kind, &spec.namespace, &spec.application);
            let elapsed =
                await_deleted(self.cluster.as_ref(), &target, spec.timeouts.undeploy).await?;
            debug!(resource = %target, elapsed_ms = elapsed.as_millis() as u64, "Deleted");
        }
        Ok(())
    }
}

#[async_trait]
impl ScenarioPhases for DefaultPhases {
    async fn execute(&self, phase: PhaseKind, spec: &ScenarioSpec) -> kverify_core::Result<()> {
        match phase {
            PhaseKind::Generate => self.generate(spec).await,
            PhaseKind::Helm => self.helm(spec).await,
            PhaseKind::Build => self.build(spec).await,
            PhaseKind::Apply => self.apply(spec).await,
            PhaseKind::Verify => self.verify(spec).await,
            PhaseKind::Undeploy => self.undeploy(spec).await,
        }
    }
}
