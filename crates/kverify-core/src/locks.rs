//! Named exclusive/shared locks serializing cluster-mutating phases.
//!
//! Each key maps to an async read/write gate created on first use and kept
//! for the coordinator's lifetime. Acquisition returns a [`LockGuard`]; the
//! holder is removed and the gate released when the guard drops, on every
//! exit path of the guarded work.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::error::VerifyError;
use crate::metrics::METRICS;
use crate::obs;

/// Key guarding image registries and externally routable ports.
pub const CLUSTER_RESOURCE_INTENSIVE: &str = "cluster-resource-intensive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Exclusive,
    Shared,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Exclusive => f.write_str("exclusive"),
            LockMode::Shared => f.write_str("shared"),
        }
    }
}

/// Observable state of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held { mode: LockMode, holders: Vec<String> },
}

#[derive(Default)]
struct LockEntry {
    gate: Arc<RwLock<()>>,
    mode: Option<LockMode>,
    holders: Vec<String>,
}

type Registry = Arc<Mutex<HashMap<String, LockEntry>>>;

fn registry_lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, LockEntry>> {
    // Entries stay consistent even if a holder panicked mid-transition.
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide lock table shared by concurrently running scenarios.
///
/// Cloning is cheap and every clone sees the same keys.
#[derive(Clone, Default)]
pub struct ResourceLockCoordinator {
    registry: Registry,
}

impl fmt::Debug for ResourceLockCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = registry_lock(&self.registry).keys().cloned().collect();
        f.debug_struct("ResourceLockCoordinator")
            .field("keys", &keys)
            .finish()
    }
}

enum Permit {
    Exclusive(OwnedRwLockWriteGuard<()>),
    Shared(OwnedRwLockReadGuard<()>),
}

/// Scoped hold on one key. Dropping it releases the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    key: String,
    holder: String,
    registry: Registry,
    permit: Permit,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn mode(&self) -> LockMode {
        match self.permit {
            Permit::Exclusive(_) => LockMode::Exclusive,
            Permit::Shared(_) => LockMode::Shared,
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("holder", &self.holder)
            .field("mode", &self.mode())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        {
            let mut entries = registry_lock(&self.registry);
            if let Some(entry) = entries.get_mut(&self.key) {
                if let Some(pos) = entry.holders.iter().position(|h| *h == self.holder) {
                    entry.holders.remove(pos);
                }
                if entry.holders.is_empty() {
                    entry.mode = None;
                }
            }
        }
        obs::emit_lock_released(&self.key, &self.holder);
    }
}

impl ResourceLockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, key: &str) -> Arc<RwLock<()>> {
        let mut entries = registry_lock(&self.registry);
        Arc::clone(&entries.entry(key.to_string()).or_default().gate)
    }

    fn register(&self, key: &str, holder: &str, permit: Permit, started: Instant) -> LockGuard {
        let mode = match permit {
            Permit::Exclusive(_) => LockMode::Exclusive,
            Permit::Shared(_) => LockMode::Shared,
        };
        {
            let mut entries = registry_lock(&self.registry);
            let entry = entries.entry(key.to_string()).or_default();
            entry.mode = Some(mode);
            entry.holders.push(holder.to_string());
        }
        METRICS.inc_lock_acquisitions();
        obs::emit_lock_acquired(key, &mode.to_string(), holder, started.elapsed());
        LockGuard {
            key: key.to_string(),
            holder: holder.to_string(),
            registry: Arc::clone(&self.registry),
            permit,
        }
    }

    /// Wait until no one holds `key`, then hold it alone.
    pub async fn acquire_exclusive(&self, key: &str, holder: &str) -> LockGuard {
        let started = Instant::now();
        debug!(key, holder, "waiting for exclusive lock");
        let permit = self.gate(key).write_owned().await;
        self.register(key, holder, Permit::Exclusive(permit), started)
    }

    /// Wait only while an exclusive holder (or queued exclusive waiter) exists.
    pub async fn acquire_shared(&self, key: &str, holder: &str) -> LockGuard {
        let started = Instant::now();
        debug!(key, holder, "waiting for shared lock");
        let permit = self.gate(key).read_owned().await;
        self.register(key, holder, Permit::Shared(permit), started)
    }

    /// Like [`acquire_exclusive`](Self::acquire_exclusive), giving up after `max_wait`.
    pub async fn acquire_exclusive_within(
        &self,
        key: &str,
        holder: &str,
        max_wait: Duration,
    ) -> crate::Result<LockGuard> {
        let started = Instant::now();
        match tokio::time::timeout(max_wait, self.gate(key).write_owned()).await {
            Ok(permit) => Ok(self.register(key, holder, Permit::Exclusive(permit), started)),
            Err(_) => Err(VerifyError::LockTimeout {
                key: key.to_string(),
                waited: started.elapsed(),
            }),
        }
    }

    /// Run `work` while holding `key` exclusively.
    pub async fn with_exclusive<F, Fut, T>(&self, key: &str, holder: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire_exclusive(key, holder).await;
        work().await
    }

    /// Current state of `key`; unknown keys are free.
    pub fn state(&self, key: &str) -> LockState {
        let entries = registry_lock(&self.registry);
        match entries.get(key) {
            Some(LockEntry {
                mode: Some(mode),
                holders,
                ..
            }) if !holders.is_empty() => LockState::Held {
                mode: *mode,
                holders: holders.clone(),
            },
            _ => LockState::Free,
        }
    }

    /// Keys seen so far, in no particular order.
    pub fn known_keys(&self) -> Vec<String> {
        registry_lock(&self.registry).keys().cloned().collect()
    }
}
