//! Build-tool fake for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::runner::{BuildInvocation, BuildResult, BuildTool};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
struct Reply {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Records every invocation and answers by goal: exit 0 with empty output
/// unless scripted otherwise.
#[derive(Debug, Default)]
pub struct RecordingBuildTool {
    replies: Mutex<HashMap<String, Reply>>,
    invocations: Mutex<Vec<BuildInvocation>>,
}

impl RecordingBuildTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `goal` with exit code 0 and `stdout`.
    pub fn succeed_with(&self, goal: &str, stdout: &str) {
        self.reply(goal, 0, stdout, "");
    }

    /// Answer `goal` with a non-zero exit.
    pub fn fail(&self, goal: &str, exit_code: i32, stderr: &str) {
        self.reply(goal, exit_code, "", stderr);
    }

    fn reply(&self, goal: &str, exit_code: i32, stdout: &str, stderr: &str) {
        guard(&self.replies).insert(
            goal.to_string(),
            Reply {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn invocations(&self) -> Vec<BuildInvocation> {
        guard(&self.invocations).clone()
    }

    /// Goals in invocation order.
    pub fn goals(&self) -> Vec<String> {
        guard(&self.invocations)
            .iter()
            .flat_map(|i| i.goals.iter().cloned())
            .collect()
    }

    pub fn count(&self, goal: &str) -> usize {
        self.goals().iter().filter(|g| *g == goal).count()
    }
}

#[async_trait]
impl BuildTool for RecordingBuildTool {
    async fn invoke(&self, invocation: &BuildInvocation) -> kverify_core::Result<BuildResult> {
        guard(&self.invocations).push(invocation.clone());
        let replies = guard(&self.replies);
        let reply = invocation.goals.iter().find_map(|g| replies.get(g)).cloned();
        Ok(match reply {
            Some(r) => BuildResult {
                exit_code: r.exit_code,
                stdout: r.stdout,
                stderr: r.stderr,
                duration_ms: 1,
            },
            None => BuildResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 1,
            },
        })
    }
}
