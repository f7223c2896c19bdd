//! kverify scenario runner
//!
//! One generic lifecycle (generate, helm, build, apply, verify, undeploy) driven
//! by data records describing an application, its build tool and the
//! cluster flavor it targets.

pub mod default_phases;
pub mod fakes;
pub mod manifests;
pub mod matrix;
pub mod phase;
pub mod pipeline;
pub mod runner;
pub mod spec;

pub use default_phases::DefaultPhases;
pub use matrix::run_matrix;
pub use phase::{goal_name, PhaseKind, PhasePlan, PhaseSpec};
pub use pipeline::{LifecycleOrchestrator, PhaseResult, PhaseStatus, ScenarioPhases, ScenarioReport};
pub use runner::{BuildInvocation, BuildResult, BuildTool, ProcessBuildTool};
pub use spec::{
    BuildToolKind, ClusterFlavor, ContainerExpectation, ContainerPortExpectation, Expectations,
    HelmChartExpectation, PortExpectation, ScenarioSpec, ScenarioTimeouts,
};
