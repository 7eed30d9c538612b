//! End-to-end driver: workspace, compute, training view, one submission,
//! completion wait and best-run retrieval.

use ap_platform::{Platform, SandboxConfig, SandboxPlatform};
use ap_types::{
    ApResult, AutoMlConfig, BestRun, ComputeTarget, DatasetView, ModelHandle, ProgressEvent,
    RunError, RunSnapshot, Workspace, WorkspaceConfig,
};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::dataset::build_training_view;
use crate::plan::RunPlan;
use crate::resolver::{reconcile_compute, Reconciled};
use crate::submit::Experiment;
use crate::wait::{CancelToken, WaitOptions};

/// Everything one successful invocation produced.
#[derive(Debug, Clone, Serialize)]
pub struct DriverOutcome {
    pub workspace: Workspace,
    pub compute: Reconciled,
    pub training_data: DatasetView,
    pub run: RunSnapshot,
    pub best_run: BestRun,
    pub model: ModelHandle,
}

pub struct Driver {
    platform: Arc<dyn Platform>,
    workspace_config: WorkspaceConfig,
    plan: RunPlan,
}

impl Driver {
    pub fn new(platform: Arc<dyn Platform>, workspace_config: WorkspaceConfig, plan: RunPlan) -> Self {
        Self {
            platform,
            workspace_config,
            plan,
        }
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Run the whole sequence once. Consumes the driver, so a single
    /// invocation submits at most one job.
    pub async fn execute(
        self,
        progress: Option<Sender<ProgressEvent>>,
        cancel: Option<CancelToken>,
    ) -> ApResult<DriverOutcome> {
        info!(version = env!("CARGO_PKG_VERSION"), "automl-pilot driver starting");
        self.workspace_config.validate()?;

        let platform = self.platform.as_ref();
        let plan = &self.plan;

        let workspace = platform.get_workspace(&self.workspace_config).await?;
        info!(
            workspace = %workspace.name,
            resource_group = %workspace.resource_group,
            location = %workspace.location,
            "workspace loaded"
        );

        let options = |timeout| {
            let mut opts = WaitOptions::new(timeout).with_poll_interval(plan.poll_interval());
            if let Some(token) = &cancel {
                opts = opts.with_cancel(token.clone());
            }
            if let Some(tx) = &progress {
                opts = opts.with_progress(tx.clone());
            }
            opts
        };

        let compute = reconcile_compute(
            platform,
            &workspace,
            &plan.compute,
            &options(plan.provisioning_timeout()),
        )
        .await?;

        let training_data =
            build_training_view(platform, &workspace, &plan.dataset_name, &plan.excluded_columns).await?;

        let config = AutoMlConfig::from_settings(&plan.settings, compute.target.name.clone(), training_data.clone());
        if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(RunError::SubmissionCancelled {
                experiment: plan.experiment_name.clone(),
            }
            .into());
        }
        let experiment = Experiment::new(platform, &workspace, plan.experiment_name.clone());
        let submitted = experiment.submit(config).await?;

        let run = submitted.wait_for_completion(&options(plan.run_timeout())).await?;
        let (best_run, model) = submitted.best_run().await?;
        let outcome = DriverOutcome {
            workspace: workspace.clone(),
            compute,
            training_data,
            run,
            best_run,
            model,
        };

        info!(
            run_id = %outcome.run.run_id,
            best_run = %outcome.best_run.run_id,
            model = %outcome.model.name,
            "driver finished"
        );
        Ok(outcome)
    }
}

/// Sandbox seeded with the plan's workspace, dataset and an existing
/// compute cluster, for offline runs.
pub fn demo_sandbox(workspace_config: &WorkspaceConfig, plan: &RunPlan) -> SandboxPlatform {
    let platform = SandboxPlatform::new(SandboxConfig::default()).with_workspace(workspace_config);

    let label = plan.settings.label_column_name.clone();
    let mut columns = plan.excluded_columns.clone();
    columns.push("abstract".to_string());
    if !columns.contains(&label) {
        columns.push(label);
    }
    platform.register_dataset(&workspace_config.workspace_name, &plan.dataset_name, columns);
    platform.insert_compute(&workspace_config.workspace_name, ComputeTarget::ready(&plan.compute));
    platform
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::EXCLUDED_COLUMNS;
    use crate::resolver::ReconcileAction;
    use ap_types::{ApError, ComputeError, PrimaryMetric, RunStatus};

    fn ws_config() -> WorkspaceConfig {
        WorkspaceConfig::new("sub-0001", "rg-automl", "ws-covid")
    }

    #[tokio::test(start_paused = true)]
    async fn test_covid_articles_run_end_to_end() {
        let plan = RunPlan::default();
        let sandbox = Arc::new(demo_sandbox(&ws_config(), &plan));
        let (tx, rx) = crossbeam_channel::unbounded();

        let outcome = Driver::new(sandbox.clone(), ws_config(), plan)
            .execute(Some(tx), None)
            .await
            .unwrap();

        assert_eq!(outcome.compute.action, ReconcileAction::Reused);
        assert!(sandbox.creation_requests().is_empty());
        assert_eq!(outcome.run.status, RunStatus::Completed);

        let submissions = sandbox.submissions();
        assert_eq!(submissions.len(), 1);
        let config = &submissions[0].config;
        assert_eq!(config.compute_target(), "aml-compute-cpu");
        assert_eq!(config.label_column_name(), "cluster");
        assert_eq!(config.primary_metric(), PrimaryMetric::AucWeighted);
        assert_eq!(config.n_cross_validations(), 5);
        assert_eq!(config.experiment_timeout_hours(), 0.25);
        assert_eq!(config.max_concurrent_iterations(), 4);

        let view = config.training_data();
        assert_eq!(view.source().name, "COVID19Articles_Train");
        assert_eq!(view.dropped_columns().len(), EXCLUDED_COLUMNS.len());
        assert_eq!(view.retained_columns().unwrap(), vec!["abstract", "cluster"]);

        assert_eq!(outcome.best_run.parent_run_id, outcome.run.run_id);
        assert_eq!(outcome.best_run.metric, "AUC_weighted");

        let iterations = rx
            .try_iter()
            .filter(|e| matches!(e, ProgressEvent::Iteration { .. }))
            .count();
        assert_eq!(iterations, outcome.run.iterations.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_cluster_is_created_with_plan_bounds() {
        let plan = RunPlan::default();
        let sandbox = Arc::new(SandboxPlatform::with_defaults().with_workspace(&ws_config()));
        let mut columns: Vec<String> = plan.excluded_columns.clone();
        columns.extend(["abstract".to_string(), "cluster".to_string()]);
        sandbox.register_dataset("ws-covid", &plan.dataset_name, columns);

        let outcome = Driver::new(sandbox.clone(), ws_config(), plan)
            .execute(None, None)
            .await
            .unwrap();

        assert_eq!(outcome.compute.action, ReconcileAction::Created);
        let requests = sandbox.creation_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!((requests[0].min_nodes, requests[0].max_nodes), (0, 4));
        assert_eq!(sandbox.submissions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission_propagates() {
        let mut plan = RunPlan::default();
        plan.settings.max_concurrent_iterations = 8;
        let sandbox = Arc::new(demo_sandbox(&ws_config(), &plan));

        let err = Driver::new(sandbox.clone(), ws_config(), plan)
            .execute(None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApError::Run(RunError::SubmissionRejected { .. })));
        assert_eq!(sandbox.submissions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_stops_at_first_wait() {
        let plan = RunPlan::default();
        let sandbox = Arc::new(SandboxPlatform::with_defaults().with_workspace(&ws_config()));
        let token = CancelToken::new();
        token.cancel();

        let err = Driver::new(sandbox.clone(), ws_config(), plan)
            .execute(None, Some(token))
            .await
            .unwrap_err();
        assert!(matches!(err, ApError::Compute(ComputeError::WaitCancelled { .. })));
        assert!(sandbox.creation_requests().is_empty());
        assert!(sandbox.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_skips_submission_on_existing_cluster() {
        let plan = RunPlan::default();
        let sandbox = Arc::new(demo_sandbox(&ws_config(), &plan));
        let token = CancelToken::new();
        token.cancel();

        let err = Driver::new(sandbox.clone(), ws_config(), plan)
            .execute(None, Some(token))
            .await
            .unwrap_err();
        assert!(matches!(err, ApError::Run(RunError::SubmissionCancelled { .. })));
        assert!(sandbox.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_workspace_config_fails_fast() {
        let sandbox = Arc::new(SandboxPlatform::with_defaults());
        let err = Driver::new(sandbox, WorkspaceConfig::new("", "rg", "ws"), RunPlan::default())
            .execute(None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApError::Config(_)));
    }
}
