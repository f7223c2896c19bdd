//! Structured lifecycle events for verification runs.
//!
//! Every event carries an `event = "..."` field so JSON output can be
//! filtered by kind. Scenario-scoped fields come from [`scenario_span`].

use std::time::Duration;

use tracing::{info, warn};

/// Span tagging everything a scenario logs with its run id and application.
///
/// Attach with `tracing::Instrument::instrument` so it survives `.await`.
pub fn scenario_span(run_id: &str, application: &str) -> tracing::Span {
    tracing::info_span!("kverify.scenario", run_id = %run_id, application = %application)
}

pub fn emit_scenario_started(run_id: &str, application: &str) {
    info!(event = "scenario.started", run_id = %run_id, application = %application);
}

pub fn emit_scenario_finished(run_id: &str, duration_ms: u64, passed: bool) {
    info!(
        event = "scenario.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        passed = passed,
    );
}

pub fn emit_phase_started(phase: &str) {
    info!(event = "phase.started", phase = %phase);
}

pub fn emit_phase_finished(phase: &str, duration_ms: u64, success: bool) {
    info!(
        event = "phase.finished",
        phase = %phase,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_lock_acquired(key: &str, mode: &str, holder: &str, waited: Duration) {
    info!(
        event = "lock.acquired",
        key = %key,
        mode = %mode,
        holder = %holder,
        waited_ms = waited.as_millis() as u64,
    );
}

pub fn emit_lock_released(key: &str, holder: &str) {
    info!(event = "lock.released", key = %key, holder = %holder);
}

/// A bounded wait ran out. `observed` is false when no value was ever fetched.
pub fn emit_await_timeout(description: &str, elapsed: Duration, attempts: u32, observed: bool) {
    warn!(
        event = "await.timeout",
        condition = %description,
        elapsed_ms = elapsed.as_millis() as u64,
        attempts = attempts,
        observed = observed,
    );
}

/// Best-effort cleanup failed after a primary failure (warning level).
pub fn emit_cleanup_failed(phase: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.failed", phase = %phase, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_span_enters() {
        let span = scenario_span("run-1", "vertx-simplest");
        let _entered = span.enter();
        emit_phase_started("generate");
    }
}
