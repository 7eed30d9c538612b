//! Offline run of the full driver against the sandbox platform.
//!
//! ```text
//! cargo run -p ap-driver --example sandbox_run
//! ```

use ap_driver::{demo_sandbox, spawn_printer, Driver, RunPlan};
use ap_types::WorkspaceConfig;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let workspace_config = WorkspaceConfig::new("00000000-0000-0000-0000-000000000000", "rg-automl", "ws-covid");
    let mut plan = RunPlan::default();
    plan.poll_interval_seconds = 1;

    let platform = Arc::new(demo_sandbox(&workspace_config, &plan));
    let (tx, rx) = crossbeam_channel::unbounded();
    let printer = spawn_printer(rx, std::io::stdout());

    let outcome = Driver::new(platform.clone(), workspace_config, plan)
        .execute(Some(tx), None)
        .await?;
    if printer.join().is_err() {
        anyhow::bail!("progress printer panicked");
    }

    println!();
    println!("best run {} scored {:?} on {}", outcome.best_run.run_id, outcome.best_run.score, outcome.best_run.metric);
    println!("model {}", outcome.model.name);
    println!("submissions recorded: {}", platform.submissions().len());
    Ok(())
}
