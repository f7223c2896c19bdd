//! kverify core library
//!
//! Bounded polling of eventually-consistent cluster state, ordered log
//! phrase matching, fail-fast structural assertions and named locks that
//! serialize cluster-mutating work across concurrently running scenarios.

pub mod assertions;
pub mod await_engine;
pub mod cluster;
pub mod config;
pub mod error;
pub mod fakes;
pub mod http_probe;
pub mod locks;
pub mod log_matcher;
pub mod metrics;
pub mod obs;
pub mod predicate;
pub mod telemetry;

pub use assertions::AssertionChain;
pub use await_engine::{
    await_absent, await_condition, AwaitError, Condition, Observation, PollSchedule, Satisfied,
};
pub use cluster::{
    await_deleted, await_resource, await_selected, ClusterClient, ClusterConfig,
    KubeClusterClient, Labels, ResourceKind, ResourceRef,
};
pub use config::VerifyConfig;
pub use error::{ClusterError, Transient, VerifyError, NOT_OBSERVED};
pub use http_probe::HttpProbe;
pub use locks::{
    LockGuard, LockMode, LockState, ResourceLockCoordinator, CLUSTER_RESOURCE_INTENSIVE,
};
pub use log_matcher::{
    assert_absent, match_ordered, match_ordered_stream, CapturedLog, LogAssertion, LogMatch,
    LogSource, OrderedCursor, PodLog,
};
pub use predicate::Predicate;

/// Result type for verification operations
pub type Result<T> = std::result::Result<T, VerifyError>;
