//! In-memory fakes for the cluster and log seams (testing only).
//!
//! `FakeCluster` answers `get`/`list`/`pod_logs` from scripted responses and
//! counts calls; `ScriptedLog` is a log snapshot that grows on every read.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::cluster::{ClusterClient, Labels, ResourceKind};
use crate::error::ClusterError;
use crate::log_matcher::LogSource;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Responses handed out in order; the last one repeats forever.
#[derive(Debug, Clone)]
struct Script<T> {
    queue: VecDeque<Result<T, ClusterError>>,
    sticky: Result<T, ClusterError>,
}

impl<T: Clone> Script<T> {
    fn fixed(value: Result<T, ClusterError>) -> Self {
        Self {
            queue: VecDeque::new(),
            sticky: value,
        }
    }

    fn next(&mut self) -> Result<T, ClusterError> {
        if let Some(r) = self.queue.pop_front() {
            self.sticky = r;
        }
        self.sticky.clone()
    }

    fn peek(&self) -> &Result<T, ClusterError> {
        self.queue.front().unwrap_or(&self.sticky)
    }
}

type ObjectKey = (ResourceKind, String, String);

fn not_found(kind: ResourceKind, namespace: &str, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn labels_of(value: &Value) -> Labels {
    value
        .pointer("/metadata/labels")
        .and_then(|l| serde_json::from_value(l.clone()).ok())
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, Script<Value>>,
    logs: HashMap<(String, String), Script<String>>,
    get_calls: HashMap<ResourceKind, u32>,
    list_calls: HashMap<ResourceKind, u32>,
}

/// Scriptable stand-in for a cluster API.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under its `metadata.name`; every later read returns it.
    pub fn insert(&self, kind: ResourceKind, namespace: &str, value: Value) {
        let name = value
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        guard(&self.state).objects.insert(
            (kind, namespace.to_string(), name),
            Script::fixed(Ok(value)),
        );
    }

    /// Successive `get` results for one object, the last repeating.
    pub fn script(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        responses: Vec<Result<Value, ClusterError>>,
    ) {
        let mut queue: VecDeque<_> = responses.into();
        let sticky = queue
            .pop_back()
            .unwrap_or_else(|| Err(not_found(kind, namespace, name)));
        queue.push_back(sticky.clone());
        guard(&self.state).objects.insert(
            (kind, namespace.to_string(), name.to_string()),
            Script { queue, sticky },
        );
    }

    /// Make the object disappear for every later read.
    pub fn remove(&self, kind: ResourceKind, namespace: &str, name: &str) {
        guard(&self.state)
            .objects
            .remove(&(kind, namespace.to_string(), name.to_string()));
    }

    /// Successive log snapshots for one pod, the last repeating.
    pub fn script_logs(&self, namespace: &str, pod: &str, snapshots: Vec<String>) {
        let mut queue: VecDeque<_> = snapshots.into_iter().map(Ok).collect();
        let sticky = queue.pop_back().unwrap_or_else(|| Ok(String::new()));
        queue.push_back(sticky.clone());
        guard(&self.state)
            .logs
            .insert((namespace.to_string(), pod.to_string()), Script { queue, sticky });
    }

    pub fn get_calls(&self, kind: ResourceKind) -> u32 {
        guard(&self.state).get_calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn list_calls(&self, kind: ResourceKind) -> u32 {
        guard(&self.state).list_calls.get(&kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Value, ClusterError> {
        let mut state = guard(&self.state);
        *state.get_calls.entry(kind).or_default() += 1;
        match state
            .objects
            .get_mut(&(kind, namespace.to_string(), name.to_string()))
        {
            Some(script) => script.next(),
            None => Err(not_found(kind, namespace, name)),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<Value>, ClusterError> {
        let mut state = guard(&self.state);
        *state.list_calls.entry(kind).or_default() += 1;
        let mut items = Vec::new();
        for ((k, ns, _), script) in &state.objects {
            if *k != kind || ns != namespace {
                continue;
            }
            match script.peek() {
                Ok(value) => {
                    let labels = labels_of(value);
                    if selector.iter().all(|(key, v)| labels.get(key) == Some(v)) {
                        items.push(value.clone());
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.clone()),
            }
        }
        Ok(items)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, ClusterError> {
        let mut state = guard(&self.state);
        match state.logs.get_mut(&(namespace.to_string(), pod.to_string())) {
            Some(script) => script.next(),
            None => Err(not_found(ResourceKind::Pod, namespace, pod)),
        }
    }
}

/// Log text that grows by a fixed number of lines on every read.
#[derive(Debug)]
pub struct ScriptedLog {
    lines: Vec<String>,
    per_read: usize,
    reads: Mutex<usize>,
}

impl ScriptedLog {
    pub fn growing<S: Into<String>>(lines: impl IntoIterator<Item = S>, per_read: usize) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            per_read: per_read.max(1),
            reads: Mutex::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        *guard(&self.reads)
    }
}

#[async_trait]
impl LogSource for ScriptedLog {
    fn describe(&self) -> String {
        "scripted log".to_string()
    }

    async fn read(&self) -> Result<String, ClusterError> {
        let mut reads = guard(&self.reads);
        *reads += 1;
        let visible = (*reads * self.per_read).min(self.lines.len());
        let mut text = String::new();
        for line in &self.lines[..visible] {
            text.push_str(line);
            text.push('\n');
        }
        Ok(text)
    }
}
