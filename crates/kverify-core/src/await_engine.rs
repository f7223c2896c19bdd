//! Bounded polling of eventually-consistent cluster state.
//!
//! [`await_condition`] repeatedly invokes a fetch closure until a predicate
//! holds or the schedule's timeout elapses. Transient fetch failures count as
//! "not yet"; anything else aborts the wait immediately.
//!
//! The wait never exceeds `timeout + poll_interval` of wall time: fetches are
//! themselves bounded by that hard deadline.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Transient, VerifyError, NOT_OBSERVED};
use crate::metrics::METRICS;
use crate::obs;
use crate::predicate::Predicate;

/// Timeout and poll interval for one wait.
///
/// Invariant: `0 < poll_interval < timeout`. Enforced by [`PollSchedule::new`]
/// and on deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSchedule", into = "RawSchedule")]
pub struct PollSchedule {
    timeout: Duration,
    poll_interval: Duration,
}

#[derive(Serialize, Deserialize)]
struct RawSchedule {
    timeout_ms: u64,
    poll_interval_ms: u64,
}

impl TryFrom<RawSchedule> for PollSchedule {
    type Error = VerifyError;

    fn try_from(raw: RawSchedule) -> Result<Self, Self::Error> {
        PollSchedule::new(
            Duration::from_millis(raw.timeout_ms),
            Duration::from_millis(raw.poll_interval_ms),
        )
    }
}

impl From<PollSchedule> for RawSchedule {
    fn from(s: PollSchedule) -> Self {
        RawSchedule {
            timeout_ms: s.timeout.as_millis() as u64,
            poll_interval_ms: s.poll_interval.as_millis() as u64,
        }
    }
}

impl PollSchedule {
    pub fn new(timeout: Duration, poll_interval: Duration) -> crate::Result<Self> {
        if poll_interval.is_zero() {
            return Err(VerifyError::InvalidCondition(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if poll_interval >= timeout {
            return Err(VerifyError::InvalidCondition(format!(
                "poll interval {}ms must be shorter than timeout {}ms",
                poll_interval.as_millis(),
                timeout.as_millis()
            )));
        }
        Ok(Self {
            timeout,
            poll_interval,
        })
    }

    /// Schedule for `const` defaults; an invalid pair fails const evaluation.
    pub const fn fixed_secs(timeout: u64, poll_interval: u64) -> Self {
        assert!(poll_interval > 0 && poll_interval < timeout);
        Self {
            timeout: Duration::from_secs(timeout),
            poll_interval: Duration::from_secs(poll_interval),
        }
    }

    /// Convenience constructor in whole seconds.
    pub fn secs(timeout: u64, poll_interval: u64) -> crate::Result<Self> {
        Self::new(
            Duration::from_secs(timeout),
            Duration::from_secs(poll_interval),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Upper bound on the wall time of a wait using this schedule.
    pub fn hard_limit(&self) -> Duration {
        self.timeout + self.poll_interval
    }
}

/// A predicate over `T` paired with the schedule it must hold within.
pub struct Condition<T> {
    pub predicate: Predicate<T>,
    pub schedule: PollSchedule,
}

impl<T> Condition<T> {
    pub fn new(predicate: Predicate<T>, schedule: PollSchedule) -> Self {
        Self {
            predicate,
            schedule,
        }
    }
}

impl<T> Clone for Condition<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            schedule: self.schedule,
        }
    }
}

impl<T> fmt::Debug for Condition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("predicate", &self.predicate.description())
            .field("schedule", &self.schedule)
            .finish()
    }
}

/// The last value a wait saw, or the explicit absence of one.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T> {
    NotObserved,
    Observed(T),
}

impl<T> Observation<T> {
    pub fn as_option(&self) -> Option<&T> {
        match self {
            Observation::NotObserved => None,
            Observation::Observed(v) => Some(v),
        }
    }

    pub fn is_observed(&self) -> bool {
        matches!(self, Observation::Observed(_))
    }
}

/// A predicate that held, with the value it held for.
#[derive(Debug, Clone)]
pub struct Satisfied<T> {
    pub value: T,
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Why a wait ended without a satisfying value.
#[derive(Debug, Clone)]
pub enum AwaitError<T> {
    Timeout {
        last: Observation<T>,
        elapsed: Duration,
        attempts: u32,
    },
    Fatal {
        reason: String,
        elapsed: Duration,
        attempts: u32,
    },
}

impl<T: fmt::Debug> AwaitError<T> {
    /// Render into the scenario-level taxonomy, naming what was awaited.
    pub fn into_verify_error(self, what: impl Into<String>) -> VerifyError {
        let what = what.into();
        match self {
            AwaitError::Timeout {
                last,
                elapsed,
                attempts,
            } => VerifyError::AwaitTimeout {
                what,
                elapsed,
                attempts,
                last_observed: last.as_option().map(|v| format!("{v:?}")),
            },
            AwaitError::Fatal {
                reason, elapsed, ..
            } => VerifyError::AwaitFatal {
                what,
                elapsed,
                reason,
            },
        }
    }
}

impl<T> AwaitError<T> {
    pub fn elapsed(&self) -> Duration {
        match self {
            AwaitError::Timeout { elapsed, .. } | AwaitError::Fatal { elapsed, .. } => *elapsed,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AwaitError::Timeout { .. })
    }
}

/// Poll `fetch` until `condition` holds or its schedule runs out.
///
/// `fetch` is invoked afresh on every attempt. A fetch failure for which
/// [`Transient::is_transient`] is true counts as "not yet"; any other failure
/// ends the wait with [`AwaitError::Fatal`].
pub async fn await_condition<T, E, F, Fut>(
    mut fetch: F,
    condition: &Condition<T>,
) -> Result<Satisfied<T>, AwaitError<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + fmt::Display,
{
    let schedule = condition.schedule;
    let start = Instant::now();
    let hard_deadline = start + schedule.hard_limit();
    let mut last = Observation::NotObserved;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        METRICS.inc_polls();

        let budget = hard_deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(budget, fetch()).await {
            Err(_) => {
                debug!(attempts, "fetch overran the wait deadline");
                break;
            }
            Ok(Ok(value)) => {
                if condition.predicate.test(&value) {
                    let elapsed = start.elapsed();
                    debug!(
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "condition satisfied: {}",
                        condition.predicate.description()
                    );
                    return Ok(Satisfied {
                        value,
                        elapsed,
                        attempts,
                    });
                }
                trace!(attempts, "condition not yet satisfied");
                last = Observation::Observed(value);
            }
            Ok(Err(e)) if e.is_transient() => {
                trace!(attempts, error = %e, "transient fetch failure");
            }
            Ok(Err(e)) => {
                return Err(AwaitError::Fatal {
                    reason: e.to_string(),
                    elapsed: start.elapsed(),
                    attempts,
                });
            }
        }

        if start.elapsed() >= schedule.timeout() {
            break;
        }
        tokio::time::sleep(schedule.poll_interval()).await;
    }

    let elapsed = start.elapsed();
    METRICS.inc_await_timeouts();
    obs::emit_await_timeout(
        condition.predicate.description(),
        elapsed,
        attempts,
        last.is_observed(),
    );
    Err(AwaitError::Timeout {
        last,
        elapsed,
        attempts,
    })
}

/// Poll until `fetch` reports the resource as gone.
///
/// `fetch` yields `Ok(Some(_))` while the resource still exists and
/// `Ok(None)` once it has been deleted. The last still-present value is kept
/// for diagnostics.
pub async fn await_absent<T, E, F, Fut>(
    fetch: F,
    schedule: PollSchedule,
) -> Result<Satisfied<Option<T>>, AwaitError<Option<T>>>
where
    F: FnMut() -> Fut,
    T: 'static,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Transient + fmt::Display,
{
    let gone = Predicate::new("resource deleted", |v: &Option<T>| v.is_none());
    await_condition(fetch, &Condition::new(gone, schedule)).await
}

impl<T: fmt::Debug> fmt::Display for Observation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::NotObserved => f.write_str(NOT_OBSERVED),
            Observation::Observed(v) => write!(f, "{v:?}"),
        }
    }
}
