//! Error taxonomy for cluster verification.

use std::time::Duration;

/// Failures reported by a [`ClusterClient`](crate::cluster::ClusterClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("access to {kind} in namespace {namespace} forbidden: {reason}")]
    Forbidden {
        kind: String,
        namespace: String,
        reason: String,
    },

    /// The API server does not serve this kind at all, such as an OpenShift
    /// kind on a vanilla cluster.
    #[error("cluster does not serve {kind}: {reason}")]
    UnknownKind { kind: String, reason: String },

    #[error("cluster API unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode {kind}: {reason}")]
    Decode { kind: String, reason: String },

    #[error("cluster client failed: {0}")]
    Client(String),
}

impl ClusterError {
    /// Whether a poller should treat this failure as "not yet satisfied".
    ///
    /// A resource that does not exist yet and a briefly unreachable API server
    /// are both expected while the cluster converges. Everything else aborts.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterError::NotFound { .. } | ClusterError::Unavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Classification hook used by the await engine.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ClusterError {
    fn is_transient(&self) -> bool {
        ClusterError::is_transient(self)
    }
}

/// Refused connections, timeouts and non-2xx statuses are all retried: the
/// endpoint may lag the service object. Only a malformed request is fatal.
impl Transient for reqwest::Error {
    fn is_transient(&self) -> bool {
        !self.is_builder()
    }
}

/// Marker rendered when a wait never obtained a single value.
pub const NOT_OBSERVED: &str = "<not observed>";

/// Verification errors surfaced to scenario runners.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(
        "timed out after {}ms ({attempts} attempt(s)) waiting for {what}; last observed: {}",
        millis(.elapsed),
        observed_or_marker(.last_observed)
    )]
    AwaitTimeout {
        what: String,
        elapsed: Duration,
        attempts: u32,
        last_observed: Option<String>,
    },

    #[error("aborted after {}ms waiting for {what}: {reason}", millis(.elapsed))]
    AwaitFatal {
        what: String,
        elapsed: Duration,
        reason: String,
    },

    #[error(
        "log phrases incomplete after {}ms: matched {matched}/{} (next: {:?}); \
         captured log:\n{captured}",
        millis(.elapsed),
        .expected.len(),
        next_phrase(.expected, .matched)
    )]
    LogTimeout {
        matched: usize,
        expected: Vec<String>,
        elapsed: Duration,
        captured: String,
    },

    #[error("forbidden log phrase {phrase:?} present")]
    ForbiddenLogPhrase { phrase: String },

    #[error("{subject}: {check} expected {expected}, got {actual}")]
    AssertionMismatch {
        subject: String,
        check: String,
        expected: String,
        actual: String,
    },

    #[error("lock {key} not acquired within {}ms", millis(.waited))]
    LockTimeout { key: String, waited: Duration },

    #[error("{tool} {goals:?} exited with code {exit_code}: {stderr}")]
    BuildInvocation {
        tool: String,
        goals: Vec<String>,
        exit_code: i32,
        stderr: String,
    },

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl VerifyError {
    /// Errors after which the scenario must not continue with later phases,
    /// regardless of phase policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VerifyError::AwaitFatal { .. } | VerifyError::BuildInvocation { .. }
        )
    }

    /// Wait duration carried by the error, if it came from a bounded wait.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            VerifyError::AwaitTimeout { elapsed, .. }
            | VerifyError::AwaitFatal { elapsed, .. }
            | VerifyError::LogTimeout { elapsed, .. } => Some(*elapsed),
            VerifyError::LockTimeout { waited, .. } => Some(*waited),
            _ => None,
        }
    }
}

fn millis(d: &Duration) -> u128 {
    d.as_millis()
}

fn observed_or_marker(last: &Option<String>) -> &str {
    last.as_deref().unwrap_or(NOT_OBSERVED)
}

fn next_phrase<'a>(expected: &'a [String], matched: &usize) -> &'a str {
    expected.get(*matched).map(String::as_str).unwrap_or("")
}
