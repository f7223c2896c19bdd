//! Harness configuration read from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterConfig;

/// Settings shared by every scenario of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyConfig {
    /// Address of a cluster node, used to reach node ports.
    pub node_host: String,
    /// Which kubeconfig context the cluster client connects with.
    pub cluster: ClusterConfig,
    /// Scenarios allowed to run at once.
    pub max_parallel: usize,
    /// Upper bound on waiting for a mutating-phase lock; unbounded when unset.
    pub lock_wait_secs: Option<u64>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            node_host: std::env::var("KVERIFY_NODE_HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            cluster: ClusterConfig::default(),
            max_parallel: env_parse("KVERIFY_MAX_PARALLEL").unwrap_or(2).max(1),
            lock_wait_secs: env_parse("KVERIFY_LOCK_WAIT_SECS"),
        }
    }
}

impl VerifyConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn lock_wait(&self) -> Option<Duration> {
        self.lock_wait_secs.map(Duration::from_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
