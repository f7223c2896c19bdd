//! kverify - Kubernetes integration verification runner
//!
//! ## Commands
//!
//! - `run`: execute every scenario of a matrix and report per-phase results
//! - `plan`: print the goals each scenario would invoke, without running them

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kverify_core::metrics::METRICS;
use kverify_core::{KubeClusterClient, ResourceLockCoordinator, VerifyConfig};
use kverify_scenario::{
    goal_name, run_matrix, DefaultPhases, LifecycleOrchestrator, PhasePlan, PhaseStatus,
    ProcessBuildTool, ScenarioReport, ScenarioSpec,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "kverify")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy, verify and undeploy applications on a cluster", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario matrix
    Run {
        /// JSON array of scenario records
        matrix: PathBuf,

        /// Only run scenarios for these applications
        #[arg(long = "only")]
        only: Vec<String>,

        /// Address of a cluster node, for node-port probes
        #[arg(long, env = "KVERIFY_NODE_HOST")]
        node_host: Option<String>,

        /// Kubeconfig context to use
        #[arg(long, env = "KVERIFY_CLUSTER_CONTEXT")]
        context: Option<String>,

        /// Scenarios run at once
        #[arg(long, env = "KVERIFY_MAX_PARALLEL")]
        max_parallel: Option<usize>,

        /// Give up on a mutating-phase lock after this many seconds
        #[arg(long, env = "KVERIFY_LOCK_WAIT_SECS")]
        lock_wait_secs: Option<u64>,

        /// Write the full report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the build-tool goals each scenario would invoke
    Plan {
        /// JSON array of scenario records
        matrix: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // KVERIFY_* settings may come from a local .env
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    kverify_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            matrix,
            only,
            node_host,
            context,
            max_parallel,
            lock_wait_secs,
            report,
        } => {
            let mut config = VerifyConfig::from_env();
            if let Some(host) = node_host {
                config.node_host = host;
            }
            if context.is_some() {
                config.cluster.context = context;
            }
            if let Some(n) = max_parallel {
                config.max_parallel = n.max(1);
            }
            if lock_wait_secs.is_some() {
                config.lock_wait_secs = lock_wait_secs;
            }
            cmd_run(&config, &matrix, &only, report.as_deref()).await
        }
        Commands::Plan { matrix } => cmd_plan(&matrix),
    }
}

fn load_matrix(path: &Path, only: &[String]) -> Result<Vec<ScenarioSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario matrix {}", path.display()))?;
    let scenarios: Vec<ScenarioSpec> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid scenario matrix {}", path.display()))?;

    let selected: Vec<_> = scenarios
        .into_iter()
        .filter(|s| only.is_empty() || only.contains(&s.application))
        .collect();
    if selected.is_empty() {
        bail!("No scenarios selected from {}", path.display());
    }
    Ok(selected)
}

async fn cmd_run(
    config: &VerifyConfig,
    matrix: &Path,
    only: &[String],
    report_path: Option<&Path>,
) -> Result<()> {
    let scenarios = load_matrix(matrix, only)?;
    info!(
        scenarios = scenarios.len(),
        max_parallel = config.max_parallel,
        node_host = %config.node_host,
        "Loaded scenario matrix"
    );

    let cluster = KubeClusterClient::connect(&config.cluster)
        .await
        .context("Failed to connect to cluster")?;
    let cluster = Arc::new(cluster);
    let build_tool = Arc::new(ProcessBuildTool::default());
    let phases = Arc::new(DefaultPhases::new(cluster, build_tool, config.node_host.clone()));
    let orchestrator = Arc::new(
        LifecycleOrchestrator::new(phases, ResourceLockCoordinator::new())
            .with_lock_wait(config.lock_wait()),
    );

    let reports = run_matrix(orchestrator, scenarios, config.max_parallel).await;
    METRICS.flush();

    print_reports(&reports);
    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&reports)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    let failed = reports.iter().filter(|r| !r.success()).count();
    if failed > 0 {
        bail!("{failed} of {} scenario(s) failed", reports.len());
    }
    Ok(())
}

fn status_mark(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Passed => "ok",
        PhaseStatus::Failed => "FAILED",
        PhaseStatus::Skipped => "skipped",
    }
}

fn print_reports(reports: &[ScenarioReport]) {
    for report in reports {
        let verdict = if report.success() { "PASS" } else { "FAIL" };
        println!(
            "{verdict} {} ({} ms, {} passed, {} failed)",
            report.scenario,
            report.duration_ms,
            report.passed_count(),
            report.failed_count()
        );
        for phase in &report.phases {
            let cleanup = if phase.cleanup { " [cleanup]" } else { "" };
            println!(
                "  {:<9} {:<7} {:>7} ms{cleanup}",
                phase.phase.name(),
                status_mark(phase.status),
                phase.duration_ms
            );
            if let Some(error) = &phase.error {
                println!("    {error}");
            }
        }
        if let Some(failure) = &report.failure {
            println!("  failure: {failure}");
        }
    }
}

#[derive(Serialize)]
struct PlannedScenario {
    scenario: String,
    goals: Vec<String>,
}

fn plan_for(spec: &ScenarioSpec, plan: &PhasePlan) -> PlannedScenario {
    PlannedScenario {
        scenario: spec.to_string(),
        goals: plan
            .enabled()
            .filter(|p| spec.runs_phase(p.kind))
            .map(|p| goal_name(spec.build_tool, spec.flavor, p.kind.goal()))
            .collect(),
    }
}

fn cmd_plan(matrix: &Path) -> Result<()> {
    let scenarios = load_matrix(matrix, &[])?;
    let plan = PhasePlan::standard();
    let planned: Vec<_> = scenarios.iter().map(|s| plan_for(s, &plan)).collect();
    println!("{}", serde_json::to_string_pretty(&planned)?);
    Ok(())
}
