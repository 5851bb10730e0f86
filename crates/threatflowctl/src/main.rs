use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use threatflow_control_plane::{
    analysis::{AnalysisFile, AnalysisService, IntelOwlClient, ReplayAnalysisService},
    config::IntelOwlConfig,
    engine::{CompiledPlan, ExecutorConfig, GraphCompiler, VerdictRuleTable},
    schema::AnalyzerSchemaRegistry,
    services::{RunSummary, WorkflowService},
    workflow::{load_workflow, validate},
};

#[derive(Parser)]
#[command(name = "threatflow")]
#[command(version, about = "ThreatFlow Command Line Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Analyzer schema file (default: THREATFLOW_SCHEMA_PATH, then bundled)
    #[arg(long, global = true)]
    schema: Option<String>,

    /// Verdict rule table (default: THREATFLOW_RULES_PATH, then bundled)
    #[arg(long, global = true)]
    rules: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a workflow and print its stage plan
    Compile {
        /// Workflow file (JSON or YAML)
        workflow: PathBuf,

        /// Emit only JSON
        #[arg(short, long)]
        json: bool,
    },
    /// Validate a workflow against the analyzer schemas
    Validate {
        workflow: PathBuf,

        #[arg(short, long)]
        json: bool,
    },
    /// Run a file through a workflow
    ///
    /// Uses IntelOwl from INTELOWL_* environment variables unless
    /// --replay points at a file of canned analyzer reports.
    ///
    /// Examples:
    ///     threatflow run workflow.json --file sample.exe
    ///     threatflow run workflow.yaml --file sample.exe --replay reports.json --json
    #[command(verbatim_doc_comment)]
    Run {
        workflow: PathBuf,

        /// File to analyze
        #[arg(short, long)]
        file: PathBuf,

        /// Answer from canned reports instead of IntelOwl
        #[arg(long, value_name = "REPORTS")]
        replay: Option<PathBuf>,

        /// Per-stage timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        #[arg(short, long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();
    init_tracing(cli.verbose);
    cli.schema = cli.schema.or_else(|| std::env::var("THREATFLOW_SCHEMA_PATH").ok());
    cli.rules = cli.rules.or_else(|| std::env::var("THREATFLOW_RULES_PATH").ok());

    match cli.command {
        Commands::Compile { workflow, json } => {
            let graph = load_workflow(&workflow)?;
            let plan = GraphCompiler::new().compile(&graph)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
        }
        Commands::Validate { workflow, json } => {
            let graph = load_workflow(&workflow)?;
            let registry = AnalyzerSchemaRegistry::load(cli.schema.as_deref())?;
            let report = validate(&graph, &registry);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for issue in &report.issues {
                    let node = issue
                        .node_id
                        .as_deref()
                        .map(|n| format!(" [{}]", n))
                        .unwrap_or_default();
                    println!("{:<7}{} {}", issue.severity.to_string(), node, issue.message);
                    for suggestion in &issue.suggestions {
                        println!("         - {}", suggestion);
                    }
                }
                println!(
                    "{} error(s), {} warning(s)",
                    report.error_count, report.warning_count
                );
            }
            if !report.valid {
                std::process::exit(1);
            }
        }
        Commands::Run {
            workflow,
            file,
            replay,
            timeout,
            json,
        } => {
            let graph = load_workflow(&workflow)?;
            if !file.is_file() {
                bail!("{} is not a file", file.display());
            }

            let mut intelowl = IntelOwlConfig::from_env().unwrap_or_default();
            if let Some(seconds) = timeout {
                intelowl.analysis_timeout = seconds;
            }
            let service = analysis_service(replay.as_deref(), &intelowl)?;
            let mut executor = ExecutorConfig::from(&intelowl);
            if replay.is_some() {
                executor.poll_interval = Duration::from_millis(10);
            }

            let workflows = WorkflowService::new(
                service,
                Arc::new(VerdictRuleTable::load(cli.rules.as_deref())?),
                Arc::new(AnalyzerSchemaRegistry::load(cli.schema.as_deref())?),
                executor,
            );

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupted, stopping before the next stage");
                    on_interrupt.cancel();
                }
            });

            let summary = workflows
                .run(&graph, &AnalysisFile::from_path(file), &cancel)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
    }

    Ok(())
}

fn analysis_service(
    replay: Option<&Path>,
    intelowl: &IntelOwlConfig,
) -> Result<Arc<dyn AnalysisService>> {
    match replay {
        Some(path) => {
            let replay = ReplayAnalysisService::from_path(path)
                .with_context(|| format!("Failed to load replay reports from {}", path.display()))?;
            Ok(Arc::new(replay))
        }
        None => {
            if intelowl.api_key().is_none() {
                bail!("IntelOwl is not configured (set INTELOWL_API_KEY or use --replay)");
            }
            let client = IntelOwlClient::new(intelowl).context("Failed to create IntelOwl client")?;
            Ok(Arc::new(client))
        }
    }
}

fn print_plan(plan: &CompiledPlan) {
    println!(
        "{} stage(s), conditionals: {}",
        plan.stages.len(),
        plan.has_conditionals
    );
    for stage in &plan.stages {
        let analyzers = if stage.analyzers.is_empty() {
            "-".to_string()
        } else {
            stage.analyzers.join(", ")
        };
        println!("  [{}] {}", stage.id, stage.description);
        println!("      analyzers: {}", analyzers);
        println!("      sinks:     {}", stage.target_sinks.join(", "));
        if stage.routing_fallback {
            println!("      (sinks could not be resolved, all sinks assigned)");
        }
    }
    for warning in &plan.warnings {
        println!("warning: {}", warning);
    }
}

fn print_summary(summary: &RunSummary) {
    let execution = &summary.execution;
    println!("run {}", summary.run_id);
    println!(
        "stages: {} executed, {} skipped, {} failed{}",
        execution.executed_stages.len(),
        execution.skipped_stages.len(),
        execution.failed_stages.len(),
        if execution.cancelled { ", cancelled" } else { "" }
    );
    for (stage, outcome) in &execution.evaluations {
        println!(
            "  stage {} condition: {} ({}, confidence {:.1})",
            stage, outcome.result, outcome.strategy, outcome.confidence
        );
    }
    for sink in &summary.sinks {
        println!("{} [{}]: {}", sink.label, sink.sink_id, sink.state);
        for report in &sink.reports {
            println!("  - {} ({})", report.name, report.status);
        }
    }
    for record in &execution.stage_records {
        if let Some(error) = &record.error {
            println!("stage {} failed: {}", record.stage_id, error);
        }
    }
}
