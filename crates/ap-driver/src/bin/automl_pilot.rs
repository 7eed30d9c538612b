//! automl-pilot CLI
//!
//! Runs the AutoML driver against the workspace platform or the in-process
//! sandbox, and renders the workspace provisioning template.

use anyhow::{Context, Result};
use ap_driver::{demo_sandbox, spawn_printer, CancelToken, Driver, DriverOutcome, RunPlan};
use ap_infra::{render_parameters, render_template, WorkspaceTemplateParams};
use ap_platform::{AzureMlClient, AzureMlClientConfig, Platform};
use ap_types::WorkspaceConfig;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "automl-pilot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Submit an AutoML classification run and report its best model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile compute, submit the run and wait for the best model
    Run(RunArgs),
    /// Print the default run plan as JSON
    Plan,
    /// Render the workspace provisioning template
    Template(TemplateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Workspace config file; searched upwards from the current directory when omitted
    #[arg(long)]
    workspace_config: Option<PathBuf>,

    /// Run plan JSON; defaults apply to missing fields
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Use the in-process sandbox instead of the workspace platform
    #[arg(long)]
    sandbox: bool,

    /// Do not print the progress table
    #[arg(long)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct TemplateArgs {
    /// Template parameters JSON
    #[arg(long)]
    params: Option<PathBuf>,

    /// Template output path; stdout when omitted
    #[arg(long)]
    out: Option<PathBuf>,

    /// Also write a parameters file here
    #[arg(long)]
    parameters_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Plan => {
            println!("{}", serde_json::to_string_pretty(&RunPlan::default())?);
            Ok(())
        }
        Commands::Template(args) => template(args),
    }
}

fn load_workspace_config(explicit: Option<&Path>, sandbox: bool) -> Result<WorkspaceConfig> {
    if let Some(path) = explicit {
        return WorkspaceConfig::from_file(path)
            .with_context(|| format!("failed to read workspace config {}", path.display()));
    }
    let cwd = std::env::current_dir()?;
    match WorkspaceConfig::discover(&cwd) {
        Ok((path, config)) => {
            info!(path = %path.display(), "using workspace config");
            Ok(config)
        }
        Err(err) if sandbox => {
            warn!(error = %err, "no workspace config found, using sandbox defaults");
            Ok(WorkspaceConfig::new("00000000-0000-0000-0000-000000000000", "rg-automl", "ws-automl"))
        }
        Err(err) => Err(err).context("no workspace config found; pass --workspace-config"),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let plan = match &args.plan {
        Some(path) => RunPlan::from_file(path)
            .with_context(|| format!("failed to read run plan {}", path.display()))?,
        None => RunPlan::default(),
    };
    let workspace_config = load_workspace_config(args.workspace_config.as_deref(), args.sandbox)?;

    let platform: Arc<dyn Platform> = if args.sandbox {
        Arc::new(demo_sandbox(&workspace_config, &plan))
    } else {
        let config = AzureMlClientConfig::from_env().context("workspace platform credentials")?;
        Arc::new(AzureMlClient::new(config)?)
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping the wait; the remote run keeps going");
                cancel.cancel();
            }
        });
    }

    let (progress, printer) = if args.quiet {
        (None, None)
    } else {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Some(tx), Some(spawn_printer(rx, std::io::stdout())))
    };

    let result = Driver::new(platform, workspace_config, plan)
        .execute(progress, Some(cancel))
        .await;

    if let Some(handle) = printer {
        match handle.join() {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(error = %err, "progress output failed"),
            Err(_) => warn!("progress printer panicked"),
        }
    }

    let outcome = result?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &DriverOutcome) {
    let best = &outcome.best_run;
    println!();
    println!("Run:        {} ({})", outcome.run.run_id, outcome.run.status);
    println!("Best run:   {}", best.run_id);
    if let Some(pipeline) = &best.pipeline {
        println!("Pipeline:   {pipeline}");
    }
    match best.score {
        Some(score) => println!("{:<11} {score:.4}", format!("{}:", best.metric)),
        None => println!("{:<11} n/a", format!("{}:", best.metric)),
    }
    println!("Model:      {}", outcome.model.name);
}

fn write_json(value: &Value, path: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => {
            std::fs::write(path, text + "\n").with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "wrote");
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn template(args: TemplateArgs) -> Result<()> {
    let params = match &args.params {
        Some(path) => WorkspaceTemplateParams::from_file(path)
            .with_context(|| format!("failed to read template params {}", path.display()))?,
        None => WorkspaceTemplateParams::default(),
    };

    write_json(&render_template(&params), args.out.as_deref())?;
    if let Some(path) = args.parameters_out.as_deref() {
        write_json(&render_parameters(&params), Some(path))?;
    }
    Ok(())
}
