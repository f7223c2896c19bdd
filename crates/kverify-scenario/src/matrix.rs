//! Bounded parallel execution of many scenarios over one orchestrator.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::pipeline::{LifecycleOrchestrator, ScenarioReport};
use crate::spec::ScenarioSpec;

/// Run every scenario with at most `max_parallel` in flight. Reports come
/// back in input order.
///
/// All scenarios share the orchestrator's lock coordinator, so mutating
/// phases of different scenarios never overlap.
pub async fn run_matrix(
    orchestrator: Arc<LifecycleOrchestrator>,
    scenarios: Vec<ScenarioSpec>,
    max_parallel: usize,
) -> Vec<ScenarioReport> {
    let max_parallel = max_parallel.max(1);
    let semaphore = Arc::new(Semaphore::new(max_parallel));
    info!(scenarios = scenarios.len(), max_parallel, "Running scenario matrix");

    let handles: Vec<_> = scenarios
        .into_iter()
        .map(|spec| {
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&orchestrator);
            let label = spec.to_string();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                orchestrator.run(&spec).await
            });
            (label, handle)
        })
        .collect();

    let (labels, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    join_all(handles)
        .await
        .into_iter()
        .zip(labels)
        .map(|(joined, label)| match joined {
            Ok(report) => report,
            Err(e) => {
                error!(scenario = %label, error = %e, "Scenario task aborted");
                aborted(label, e.to_string())
            }
        })
        .collect()
}

fn aborted(scenario: String, reason: String) -> ScenarioReport {
    let now = Utc::now();
    ScenarioReport {
        run_id: String::new(),
        scenario,
        started_at: now,
        finished_at: now,
        duration_ms: 0,
        phases: Vec::new(),
        failed_phase: None,
        failure: Some(format!("scenario task aborted: {reason}")),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseKind;
    use crate::pipeline::ScenarioPhases;
    use crate::spec::{BuildToolKind, ClusterFlavor};
    use async_trait::async_trait;
    use kverify_core::ResourceLockCoordinator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Slow {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ScenarioPhases for Slow {
        async fn execute(&self, phase: PhaseKind, spec: &ScenarioSpec) -> kverify_core::Result<()> {
            if phase == PhaseKind::Generate {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            if spec.application == "broken" && phase == PhaseKind::Apply {
                return Err(kverify_core::VerifyError::InvalidCondition("broken".into()));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_matrix_bounds_parallelism_and_keeps_order() {
        let phases = Arc::new(Slow::default());
        let orch = Arc::new(LifecycleOrchestrator::new(
            phases.clone(),
            ResourceLockCoordinator::new(),
        ));
        let names = ["a", "broken", "c", "d", "e"];
        let scenarios = names
            .iter()
            .map(|n| ScenarioSpec::new(*n, ".", BuildToolKind::Gradle, ClusterFlavor::Kubernetes))
            .collect();

        let reports = run_matrix(orch, scenarios, 2).await;

        assert_eq!(reports.len(), 5);
        for (report, name) in reports.iter().zip(names) {
            assert!(report.scenario.starts_with(name));
        }
        assert_eq!(phases.peak.load(Ordering::SeqCst), 2);
        assert!(!reports[1].success());
        assert!(reports.iter().enumerate().all(|(i, r)| i == 1 || r.success()));
    }
}
