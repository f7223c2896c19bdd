//! Scenario lifecycle orchestration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kverify_core::metrics::METRICS;
use kverify_core::{obs, LockGuard, ResourceLockCoordinator, VerifyError};
use serde::Serialize;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::phase::{PhaseKind, PhasePlan, PhaseSpec};
use crate::spec::ScenarioSpec;

/// Work behind each phase of a scenario.
#[async_trait]
pub trait ScenarioPhases: Send + Sync {
    async fn execute(&self, phase: PhaseKind, spec: &ScenarioSpec) -> kverify_core::Result<()>;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Passed,
    Failed,
    /// Not run because an earlier phase failed.
    Skipped,
}

/// Outcome of one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub phase: PhaseKind,
    pub status: PhaseStatus,
    pub duration_ms: u64,
    pub error: Option<String>,

    /// Ran as cleanup after an earlier failure.
    pub cleanup: bool,
}

impl PhaseResult {
    fn skipped(phase: PhaseKind) -> Self {
        Self {
            phase,
            status: PhaseStatus::Skipped,
            duration_ms: 0,
            error: None,
            cleanup: false,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == PhaseStatus::Passed
    }
}

/// Result of one scenario run.
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub run_id: String,
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub phases: Vec<PhaseResult>,

    /// Phase whose failure is the scenario's failure.
    pub failed_phase: Option<PhaseKind>,

    /// Rendered primary failure.
    pub failure: Option<String>,

    #[serde(skip)]
    pub error: Option<VerifyError>,
}

impl ScenarioReport {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.failure.is_none()
    }

    pub fn passed_count(&self) -> usize {
        self.phases.iter().filter(|p| p.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Failed)
            .count()
    }

    pub fn phase(&self, kind: PhaseKind) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == kind)
    }

    /// The primary failure, if any.
    pub fn into_result(self) -> kverify_core::Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Runs the phase plan of a scenario, holding each phase's lock for exactly
/// the duration of that phase.
///
/// Phases the scenario does not take part in are left out of the report.
/// After a failure the remaining phases are skipped, except undeploy, which
/// is attempted once as cleanup. Its failure is then logged, not reported as
/// the scenario's failure.
pub struct LifecycleOrchestrator {
    locks: ResourceLockCoordinator,
    phases: Arc<dyn ScenarioPhases>,
    plan: PhasePlan,
    lock_wait: Option<Duration>,
}

impl LifecycleOrchestrator {
    pub fn new(phases: Arc<dyn ScenarioPhases>, locks: ResourceLockCoordinator) -> Self {
        Self {
            locks,
            phases,
            plan: PhasePlan::standard(),
            lock_wait: None,
        }
    }

    pub fn with_plan(mut self, plan: PhasePlan) -> Self {
        self.plan = plan;
        self
    }

    /// Bound every lock wait; an expired wait fails the phase with `LockTimeout`.
    pub fn with_lock_wait(mut self, lock_wait: Option<Duration>) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn locks(&self) -> &ResourceLockCoordinator {
        &self.locks
    }

    pub fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    pub async fn run(&self, spec: &ScenarioSpec) -> ScenarioReport {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::scenario_span(&run_id, &spec.application);
        self.run_scenario(spec, run_id).instrument(span).await
    }

    async fn run_scenario(&self, spec: &ScenarioSpec, run_id: String) -> ScenarioReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let holder = format!("{}#{}", spec.application, &run_id[..8]);
        obs::emit_scenario_started(&run_id, &spec.application);
        info!(scenario = %spec, "Starting scenario");

        let mut results = Vec::new();
        let mut primary: Option<(PhaseKind, VerifyError)> = None;

        for phase in self.plan.enabled().filter(|p| spec.runs_phase(p.kind)) {
            let cleanup = primary.is_some();
            if cleanup && phase.kind != PhaseKind::Undeploy {
                info!(phase = %phase.kind, "Skipping phase after failure");
                results.push(PhaseResult::skipped(phase.kind));
                continue;
            }

            obs::emit_phase_started(phase.kind.name());
            let phase_start = Instant::now();
            let outcome = self.run_phase(phase, spec, &holder).await;
            let duration_ms = phase_start.elapsed().as_millis() as u64;
            obs::emit_phase_finished(phase.kind.name(), duration_ms, outcome.is_ok());

            let (status, error) = match outcome {
                Ok(()) => (PhaseStatus::Passed, None),
                Err(e) => {
                    METRICS.inc_phases_failed();
                    let rendered = e.to_string();
                    if cleanup {
                        obs::emit_cleanup_failed(phase.kind.name(), &e);
                    } else {
                        warn!(phase = %phase.kind, error = %rendered, "Phase failed");
                        primary = Some((phase.kind, e));
                    }
                    (PhaseStatus::Failed, Some(rendered))
                }
            };
            results.push(PhaseResult {
                phase: phase.kind,
                status,
                duration_ms,
                error,
                cleanup,
            });
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_scenario_finished(&run_id, duration_ms, primary.is_none());

        let (failed_phase, failure, error) = match primary {
            Some((kind, e)) => (Some(kind), Some(format!("{kind}: {e}")), Some(e)),
            None => (None, None, None),
        };
        ScenarioReport {
            run_id,
            scenario: spec.to_string(),
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            phases: results,
            failed_phase,
            failure,
            error,
        }
    }

    async fn run_phase(
        &self,
        phase: &PhaseSpec,
        spec: &ScenarioSpec,
        holder: &str,
    ) -> kverify_core::Result<()> {
        let _guard = match &phase.lock {
            Some(key) => Some(self.acquire(key, holder).await?),
            None => None,
        };
        self.phases.execute(phase.kind, spec).await
    }

    async fn acquire(&self, key: &str, holder: &str) -> kverify_core::Result<LockGuard> {
        match self.lock_wait {
            Some(max_wait) => self.locks.acquire_exclusive_within(key, holder, max_wait).await,
            None => Ok(self.locks.acquire_exclusive(key, holder).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{BuildToolKind, ClusterFlavor, HelmChartExpectation};
    use kverify_core::{LockState, CLUSTER_RESOURCE_INTENSIVE};
    use std::sync::Mutex;

    /// Records the phases it ran and the lock state seen during each.
    struct Recording {
        fail_on: Option<PhaseKind>,
        locks: ResourceLockCoordinator,
        seen: Mutex<Vec<(PhaseKind, bool)>>,
    }

    #[async_trait]
    impl ScenarioPhases for Recording {
        async fn execute(
            &self,
            phase: PhaseKind,
            _spec: &ScenarioSpec,
        ) -> kverify_core::Result<()> {
            let held = matches!(
                self.locks.state(CLUSTER_RESOURCE_INTENSIVE),
                LockState::Held { .. }
            );
            self.seen.lock().unwrap().push((phase, held));
            if self.fail_on == Some(phase) {
                return Err(VerifyError::AssertionMismatch {
                    subject: "Deployment default/web".into(),
                    check: "replicas".into(),
                    expected: "1".into(),
                    actual: "2".into(),
                });
            }
            Ok(())
        }
    }

    fn orchestrator(fail_on: Option<PhaseKind>) -> (LifecycleOrchestrator, Arc<Recording>) {
        let locks = ResourceLockCoordinator::new();
        let phases = Arc::new(Recording {
            fail_on,
            locks: locks.clone(),
            seen: Mutex::new(Vec::new()),
        });
        (LifecycleOrchestrator::new(phases.clone(), locks), phases)
    }

    fn spec() -> ScenarioSpec {
        ScenarioSpec::new("web", ".", BuildToolKind::Maven, ClusterFlavor::Kubernetes)
    }

    #[tokio::test]
    async fn test_all_phases_pass_in_order_with_locks() {
        let (orch, phases) = orchestrator(None);
        let report = orch.run(&spec()).await;

        assert!(report.success());
        assert_eq!(report.passed_count(), 5);
        assert_eq!(
            *phases.seen.lock().unwrap(),
            vec![
                (PhaseKind::Generate, false),
                (PhaseKind::Build, true),
                (PhaseKind::Apply, true),
                (PhaseKind::Verify, false),
                (PhaseKind::Undeploy, true),
            ]
        );
        assert_eq!(orch.locks().state(CLUSTER_RESOURCE_INTENSIVE), LockState::Free);
    }

    #[tokio::test]
    async fn test_helm_runs_unlocked_after_generate_when_requested() {
        let (orch, phases) = orchestrator(None);
        let mut spec = spec();
        spec.expectations.helm_chart = Some(HelmChartExpectation::default());

        let report = orch.run(&spec).await;

        assert!(report.success());
        assert_eq!(report.passed_count(), 6);
        let seen = phases.seen.lock().unwrap();
        assert_eq!(seen[0], (PhaseKind::Generate, false));
        assert_eq!(seen[1], (PhaseKind::Helm, false));
        assert_eq!(seen[2], (PhaseKind::Build, true));
    }

    #[tokio::test]
    async fn test_build_failure_skips_to_cleanup() {
        let (orch, phases) = orchestrator(Some(PhaseKind::Build));
        let report = orch.run(&spec()).await;

        assert!(!report.success());
        assert_eq!(report.failed_phase, Some(PhaseKind::Build));
        assert_eq!(report.phase(PhaseKind::Apply).unwrap().status, PhaseStatus::Skipped);
        assert_eq!(report.phase(PhaseKind::Verify).unwrap().status, PhaseStatus::Skipped);
        let undeploy = report.phase(PhaseKind::Undeploy).unwrap();
        assert!(undeploy.passed());
        assert!(undeploy.cleanup);
        assert_eq!(phases.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_undeploy_failure_is_primary_when_nothing_else_failed() {
        let (orch, _) = orchestrator(Some(PhaseKind::Undeploy));
        let report = orch.run(&spec()).await;
        assert_eq!(report.failed_phase, Some(PhaseKind::Undeploy));
        assert!(!report.phase(PhaseKind::Undeploy).unwrap().cleanup);
        assert!(report.failure.unwrap().starts_with("undeploy: "));
    }

    #[tokio::test]
    async fn test_disabled_phase_not_reported() {
        let (orch, phases) = orchestrator(None);
        let orch = orch.with_plan(PhasePlan::standard().without(PhaseKind::Build));
        let report = orch.run(&spec()).await;
        assert_eq!(report.phases.len(), 4);
        assert!(report.phase(PhaseKind::Build).is_none());
        assert_eq!(phases.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_lock_wait_fails_phase() {
        let (orch, phases) = orchestrator(None);
        let orch = orch.with_lock_wait(Some(Duration::from_secs(5)));
        let blocker = orch
            .locks()
            .acquire_exclusive(CLUSTER_RESOURCE_INTENSIVE, "other-scenario")
            .await;

        let report = orch.run(&spec()).await;
        drop(blocker);

        assert_eq!(report.failed_phase, Some(PhaseKind::Build));
        assert!(matches!(report.error, Some(VerifyError::LockTimeout { .. })));
        // undeploy could not get the lock either
        let undeploy = report.phase(PhaseKind::Undeploy).unwrap();
        assert_eq!(undeploy.status, PhaseStatus::Failed);
        assert!(undeploy.cleanup);
        assert_eq!(*phases.seen.lock().unwrap(), vec![(PhaseKind::Generate, false)]);
    }
}
