//! Lifecycle phase descriptors and the ordered plan the orchestrator runs.

use kverify_core::CLUSTER_RESOURCE_INTENSIVE;
use serde::{Deserialize, Serialize};

use crate::spec::{BuildToolKind, ClusterFlavor};

/// Lifecycle phases, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Generate manifests (`k8s:resource`).
    Generate,
    /// Package the manifests as a Helm chart (`k8s:helm`); opt-in per scenario.
    Helm,
    /// Build the container image (`k8s:build`).
    Build,
    /// Apply manifests to the cluster (`k8s:apply`).
    Apply,
    /// Observe the deployed application; also retrieves its log (`k8s:log`).
    Verify,
    /// Delete everything applied (`k8s:undeploy`).
    Undeploy,
}

impl PhaseKind {
    pub fn name(&self) -> &'static str {
        match self {
            PhaseKind::Generate => "generate",
            PhaseKind::Helm => "helm",
            PhaseKind::Build => "build",
            PhaseKind::Apply => "apply",
            PhaseKind::Verify => "verify",
            PhaseKind::Undeploy => "undeploy",
        }
    }

    /// Plugin goal invoked by this phase, without flavor prefix.
    pub fn goal(&self) -> &'static str {
        match self {
            PhaseKind::Generate => "resource",
            PhaseKind::Helm => "helm",
            PhaseKind::Build => "build",
            PhaseKind::Apply => "apply",
            PhaseKind::Verify => "log",
            PhaseKind::Undeploy => "undeploy",
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `k8s:build` for Maven, `k8sBuild` for Gradle.
pub fn goal_name(tool: BuildToolKind, flavor: ClusterFlavor, goal: &str) -> String {
    let prefix = flavor.goal_prefix();
    match tool {
        BuildToolKind::Maven => format!("{prefix}:{goal}"),
        BuildToolKind::Gradle => {
            let mut chars = goal.chars();
            match chars.next() {
                Some(first) => format!("{prefix}{}{}", first.to_ascii_uppercase(), chars.as_str()),
                None => prefix.to_string(),
            }
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseSpec {
    pub kind: PhaseKind,

    /// Key held exclusively while the phase runs.
    pub lock: Option<String>,

    pub enabled: bool,
}

impl PhaseSpec {
    pub fn unlocked(kind: PhaseKind) -> Self {
        Self {
            kind,
            lock: None,
            enabled: true,
        }
    }

    pub fn exclusive(kind: PhaseKind, key: &str) -> Self {
        Self {
            kind,
            lock: Some(key.to_string()),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Ordered phase list consumed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhasePlan {
    pub phases: Vec<PhaseSpec>,
}

impl PhasePlan {
    /// generate → helm → build → apply → verify → undeploy, with every
    /// cluster-mutating phase under the cluster-resource-intensive lock.
    /// Helm only writes local files, so it runs unlocked.
    pub fn standard() -> Self {
        Self {
            phases: vec![
                PhaseSpec::unlocked(PhaseKind::Generate),
                PhaseSpec::unlocked(PhaseKind::Helm),
                PhaseSpec::exclusive(PhaseKind::Build, CLUSTER_RESOURCE_INTENSIVE),
                PhaseSpec::exclusive(PhaseKind::Apply, CLUSTER_RESOURCE_INTENSIVE),
                PhaseSpec::unlocked(PhaseKind::Verify),
                PhaseSpec::exclusive(PhaseKind::Undeploy, CLUSTER_RESOURCE_INTENSIVE),
            ],
        }
    }

    /// Same plan with `kind` switched off.
    pub fn without(mut self, kind: PhaseKind) -> Self {
        for phase in &mut self.phases {
            if phase.kind == kind {
                phase.enabled = false;
            }
        }
        self
    }

    pub fn enabled(&self) -> impl Iterator<Item = &PhaseSpec> {
        self.phases.iter().filter(|p| p.enabled)
    }
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self::standard()
    }
}
