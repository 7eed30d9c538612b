//! Job submission, completion wait and best-result retrieval.

use ap_platform::Platform;
use ap_types::{
    ApResult, AutoMlConfig, BestRun, ModelHandle, ProgressEvent, RunError, RunId, RunSnapshot,
    RunStatus, Workspace,
};
use tracing::{info, warn};

use crate::wait::{WaitInterrupt, WaitOptions, Waiter};

/// Named grouping of runs inside a workspace.
pub struct Experiment<'a> {
    platform: &'a dyn Platform,
    workspace: &'a Workspace,
    name: String,
}

impl<'a> Experiment<'a> {
    pub fn new(platform: &'a dyn Platform, workspace: &'a Workspace, name: impl Into<String>) -> Self {
        Self {
            platform,
            workspace,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit `config` once. The configuration moves into the returned run.
    pub async fn submit(&self, config: AutoMlConfig) -> ApResult<SubmittedRun<'a>> {
        info!(
            experiment = %self.name,
            compute = %config.compute_target(),
            metric = %config.primary_metric(),
            label = %config.label_column_name(),
            folds = config.n_cross_validations(),
            timeout_hours = config.experiment_timeout_hours(),
            concurrency = config.max_concurrent_iterations(),
            "submitting AutoML run"
        );
        let run_id = self
            .platform
            .submit_automl(self.workspace, &self.name, &config)
            .await?;
        info!(run_id = %run_id, "run submitted");

        Ok(SubmittedRun {
            platform: self.platform,
            workspace: self.workspace,
            experiment: self.name.clone(),
            run_id,
            config,
        })
    }
}

/// A run accepted by the platform.
pub struct SubmittedRun<'a> {
    platform: &'a dyn Platform,
    workspace: &'a Workspace,
    experiment: String,
    run_id: RunId,
    config: AutoMlConfig,
}

impl<'a> SubmittedRun<'a> {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    pub fn config(&self) -> &AutoMlConfig {
        &self.config
    }

    /// Poll until the run reaches a terminal status.
    ///
    /// Emits a `RunStatus` event on every status change and one `Iteration`
    /// event per newly observed child iteration. A failed or externally
    /// cancelled run is an error; cancelling the wait leaves the run alone.
    pub async fn wait_for_completion(&self, opts: &WaitOptions) -> ApResult<RunSnapshot> {
        let waiter = Waiter::start(opts);
        let interrupted = |interrupt: WaitInterrupt| match interrupt {
            WaitInterrupt::TimedOut => RunError::Timeout {
                run_id: self.run_id.to_string(),
                timeout_seconds: opts.timeout.as_secs(),
            },
            WaitInterrupt::Cancelled => RunError::WaitCancelled {
                run_id: self.run_id.to_string(),
            },
        };

        let mut last_status: Option<RunStatus> = None;
        let mut seen = 0usize;
        let mut best: Option<f64> = None;
        loop {
            waiter.ensure_active().map_err(&interrupted)?;
            let snapshot = self.platform.get_run(self.workspace, &self.run_id).await?;

            if last_status != Some(snapshot.status) {
                info!(run_id = %self.run_id, status = %snapshot.status, "run status");
                opts.emit(ProgressEvent::RunStatus {
                    run_id: self.run_id.clone(),
                    status: snapshot.status,
                });
                last_status = Some(snapshot.status);
            }

            for record in snapshot.iterations.iter().skip(seen) {
                if let Some(score) = record.score {
                    best = Some(best.map_or(score, |b| b.max(score)));
                }
                opts.emit(ProgressEvent::Iteration {
                    record: record.clone(),
                    best_score: best,
                });
            }
            seen = seen.max(snapshot.iterations.len());

            match snapshot.status {
                RunStatus::Completed => {
                    info!(
                        run_id = %self.run_id,
                        completed = snapshot.completed_iterations(),
                        failed = snapshot.failed_iterations(),
                        best_score = ?best,
                        "run completed"
                    );
                    return Ok(snapshot);
                }
                RunStatus::Failed | RunStatus::Canceled => {
                    let message = snapshot
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("run ended with status {}", snapshot.status));
                    warn!(run_id = %self.run_id, %message, "run did not complete");
                    return Err(RunError::ExecutionFailed {
                        run_id: self.run_id.to_string(),
                        message,
                    }
                    .into());
                }
                _ => {}
            }

            waiter.pause().await.map_err(&interrupted)?;
        }
    }

    /// Best child run by the configured metric, and its model.
    pub async fn best_run(&self) -> ApResult<(BestRun, ModelHandle)> {
        let (best, model) = self.platform.get_best_run(self.workspace, &self.run_id).await?;
        info!(
            run_id = %best.run_id,
            metric = %best.metric,
            score = ?best.score,
            model = %model.name,
            "best run retrieved"
        );
        Ok((best, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_platform::{SandboxConfig, SandboxPlatform};
    use ap_types::{ApError, ComputeSpec, ComputeTarget, DatasetRef, IterationStatus, WorkspaceConfig};
    use std::time::Duration;

    use crate::wait::CancelToken;

    fn setup(config: SandboxConfig) -> (SandboxPlatform, Workspace, DatasetRef) {
        let ws_config = WorkspaceConfig::new("sub", "rg", "ws");
        let platform = SandboxPlatform::new(config).with_workspace(&ws_config);
        let dataset = platform.register_dataset("ws", "articles", ["title", "abstract", "cluster"]);
        platform.insert_compute("ws", ComputeTarget::ready(&ComputeSpec::cluster("cpu", "STANDARD_D2_V2", 0, 4)));
        (platform, Workspace::from_config(&ws_config, "eastus"), dataset)
    }

    fn config(dataset: &DatasetRef) -> AutoMlConfig {
        AutoMlConfig::classification("cluster", "cpu", dataset.drop_columns(["title"]))
    }

    fn opts() -> WaitOptions {
        WaitOptions::new(Duration::from_secs(3600)).with_poll_interval(Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_wait_and_fetch_best() {
        let (platform, workspace, dataset) = setup(SandboxConfig {
            iterations_per_run: 5,
            ..Default::default()
        });
        let experiment = Experiment::new(&platform, &workspace, "covid");
        let run = experiment.submit(config(&dataset)).await.unwrap();

        let snapshot = run.wait_for_completion(&opts()).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.iterations.len(), 5);

        let (best, model) = run.best_run().await.unwrap();
        assert_eq!(best.parent_run_id, *run.run_id());
        assert_eq!(best.score, snapshot.best_iteration().unwrap().score);
        assert_eq!(model.run_id, best.run_id);
        assert_eq!(platform.submissions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submitted_config_is_unmodified() {
        let (platform, workspace, dataset) = setup(SandboxConfig::default());
        let config = config(&dataset)
            .with_cross_validations(5)
            .with_experiment_timeout_hours(0.25)
            .with_max_concurrent_iterations(4);
        let expected = config.clone();

        let run = Experiment::new(&platform, &workspace, "covid").submit(config).await.unwrap();
        assert_eq!(run.config(), &expected);
        assert_eq!(platform.submissions()[0].config, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_surfaces_at_submission() {
        let (platform, workspace, dataset) = setup(SandboxConfig::default());
        let bad = config(&dataset).with_cross_validations(1);

        let result = Experiment::new(&platform, &workspace, "covid").submit(bad).await;
        assert!(matches!(
            result.err(),
            Some(ApError::Run(RunError::SubmissionRejected { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_events_carry_running_best() {
        let (platform, workspace, dataset) = setup(SandboxConfig {
            iterations_per_run: 6,
            fail_every_nth_iteration: Some(2),
            ..Default::default()
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        let run = Experiment::new(&platform, &workspace, "covid")
            .submit(config(&dataset))
            .await
            .unwrap();
        run.wait_for_completion(&opts().with_progress(tx)).await.unwrap();

        let mut iterations = Vec::new();
        let mut statuses = Vec::new();
        for event in rx.try_iter() {
            match event {
                ProgressEvent::Iteration { record, best_score } => iterations.push((record, best_score)),
                ProgressEvent::RunStatus { status, .. } => statuses.push(status),
                ProgressEvent::Compute { .. } => panic!("no compute events expected"),
            }
        }

        assert_eq!(iterations.len(), 6);
        assert_eq!(iterations[1].0.status, IterationStatus::Failed);
        let mut running_best = None::<f64>;
        for (record, best) in &iterations {
            if let Some(score) = record.score {
                running_best = Some(running_best.map_or(score, |b| b.max(score)));
            }
            assert_eq!(*best, running_best);
        }
        assert_eq!(statuses.first(), Some(&RunStatus::Running));
        assert_eq!(statuses.last(), Some(&RunStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failing_candidates_fail_the_wait() {
        let (platform, workspace, dataset) = setup(SandboxConfig {
            iterations_per_run: 3,
            fail_all_candidates: true,
            ..Default::default()
        });
        let run = Experiment::new(&platform, &workspace, "covid")
            .submit(config(&dataset))
            .await
            .unwrap();

        let err = run.wait_for_completion(&opts()).await.unwrap_err();
        assert!(matches!(err, ApError::Run(RunError::ExecutionFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (platform, workspace, dataset) = setup(SandboxConfig {
            iterations_per_run: 500,
            ..Default::default()
        });
        let run = Experiment::new(&platform, &workspace, "covid")
            .submit(config(&dataset))
            .await
            .unwrap();
        let opts = WaitOptions::new(Duration::from_secs(120)).with_poll_interval(Duration::from_secs(30));

        let err = run.wait_for_completion(&opts).await.unwrap_err();
        assert!(matches!(err, ApError::Run(RunError::Timeout { timeout_seconds: 120, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_leaves_run_alive() {
        let (platform, workspace, dataset) = setup(SandboxConfig::default());
        let run = Experiment::new(&platform, &workspace, "covid")
            .submit(config(&dataset))
            .await
            .unwrap();
        let token = CancelToken::new();
        token.cancel();

        let err = run.wait_for_completion(&opts().with_cancel(token)).await.unwrap_err();
        assert!(matches!(err, ApError::Run(RunError::WaitCancelled { .. })));

        let snapshot = platform.get_run(&workspace, run.run_id()).await.unwrap();
        assert!(!snapshot.status.is_terminal());
    }
}
