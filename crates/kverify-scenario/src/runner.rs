//! Build-tool invocation: one external Maven/Gradle run per mutating phase.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kverify_core::VerifyError;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::phase::goal_name;
use crate::spec::{BuildToolKind, ScenarioSpec};

/// One call to the build tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildInvocation {
    pub tool: BuildToolKind,
    pub project_dir: PathBuf,
    pub goals: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub profiles: Vec<String>,
}

impl BuildInvocation {
    /// Invocation of the flavor-specific `goal` with the scenario's
    /// profiles and properties.
    pub fn for_goal(spec: &ScenarioSpec, goal: &str) -> Self {
        Self {
            tool: spec.build_tool,
            project_dir: spec.project_dir.clone(),
            goals: vec![goal_name(spec.build_tool, spec.flavor, goal)],
            properties: spec.properties.clone(),
            profiles: spec.profiles.clone(),
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    /// Arguments after the executable.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match self.tool {
            BuildToolKind::Maven => {
                args.push("-B".to_string());
                args.extend(self.goals.iter().cloned());
                if !self.profiles.is_empty() {
                    args.push("-P".to_string());
                    args.push(self.profiles.join(","));
                }
                for (k, v) in &self.properties {
                    args.push(format!("-D{k}={v}"));
                }
            }
            BuildToolKind::Gradle => {
                args.extend(self.goals.iter().cloned());
                for (k, v) in &self.properties {
                    args.push(format!("-P{k}={v}"));
                }
                args.push("--console=plain".to_string());
            }
        }
        args
    }
}

/// Captured outcome of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildResult {
    /// Exit code (0 = success, -1 = killed or timed out).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Pass through a successful result, or describe the failure.
    pub fn check(self, invocation: &BuildInvocation) -> kverify_core::Result<BuildResult> {
        if self.success() {
            Ok(self)
        } else {
            Err(VerifyError::BuildInvocation {
                tool: invocation.tool.name().to_string(),
                goals: invocation.goals.clone(),
                exit_code: self.exit_code,
                stderr: tail(&self.stderr, 40),
            })
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Runs build-tool invocations. No retries: a failure is reported as is.
#[async_trait]
pub trait BuildTool: Send + Sync {
    async fn invoke(&self, invocation: &BuildInvocation) -> kverify_core::Result<BuildResult>;
}

/// Spawns `mvn` or `gradle` in the project directory.
#[derive(Debug, Clone)]
pub struct ProcessBuildTool {
    pub maven: String,
    pub gradle: String,
    pub timeout: Option<Duration>,
}

impl Default for ProcessBuildTool {
    fn default() -> Self {
        Self {
            maven: std::env::var("KVERIFY_MAVEN").unwrap_or_else(|_| "mvn".to_string()),
            gradle: std::env::var("KVERIFY_GRADLE").unwrap_or_else(|_| "gradle".to_string()),
            timeout: Some(Duration::from_secs(30 * 60)),
        }
    }
}

impl ProcessBuildTool {
    fn executable(&self, tool: BuildToolKind) -> &str {
        match tool {
            BuildToolKind::Maven => &self.maven,
            BuildToolKind::Gradle => &self.gradle,
        }
    }
}

#[async_trait]
impl BuildTool for ProcessBuildTool {
    async fn invoke(&self, invocation: &BuildInvocation) -> kverify_core::Result<BuildResult> {
        let start = Instant::now();
        let exe = self.executable(invocation.tool);
        let args = invocation.args();
        if invocation.tool == BuildToolKind::Gradle && !invocation.profiles.is_empty() {
            warn!(profiles = ?invocation.profiles, "gradle has no profiles; ignoring");
        }
        debug!(exe, ?args, dir = %invocation.project_dir.display(), "invoking build tool");

        let child = Command::new(exe)
            .args(&args)
            .current_dir(&invocation.project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    return Ok(BuildResult {
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: format!("{exe} timed out after {} seconds", limit.as_secs()),
                        duration_ms: start.elapsed().as_millis() as u64,
                    })
                }
            },
            None => child.wait_with_output().await?,
        };

        Ok(BuildResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
