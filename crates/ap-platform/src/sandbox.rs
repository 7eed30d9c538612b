//! Sandbox (simulated) platform.
//!
//! Keeps workspaces, compute targets, datasets and runs in memory.  Compute
//! provisioning and job progress advance one step per poll, and submissions
//! are validated the way the managed service validates them, so driver code
//! can be exercised end to end without credentials.  No model search happens
//! here: candidate scores are drawn from a seeded generator.

use ap_types::{
    ApResult, AutoMlConfig, BestRun, ComputeKind, ComputeSpec, ComputeState, ComputeTarget,
    DatasetRef, IterationRecord, IterationStatus, ModelHandle, PlatformError, RunError, RunId,
    RunSnapshot, RunStatus, Workspace, WorkspaceConfig,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::platform::Platform;

/// Shortest experiment budget the service accepts.
const MIN_EXPERIMENT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Pipelines handed out to non-ensemble iterations, in order.
const PIPELINES: [&str; 8] = [
    "MaxAbsScaler LightGBM",
    "MaxAbsScaler XGBoostClassifier",
    "SparseNormalizer XGBoostClassifier",
    "StandardScalerWrapper LogisticRegression",
    "MaxAbsScaler SGD",
    "SparseNormalizer LightGBM",
    "TruncatedSVDWrapper RandomForest",
    "StandardScalerWrapper ExtremeRandomTrees",
];

/// Behaviour knobs for the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Region reported for every workspace.
    pub location: String,
    /// Number of `get_compute` polls before a new target leaves
    /// `Provisioning`. Zero makes creation synchronous.
    pub provisioning_polls: u32,
    /// When set, provisioning ends in `Failed` with this message.
    pub provisioning_failure: Option<String>,
    /// Child iterations per run, the last two being ensembles.
    pub iterations_per_run: u32,
    /// Every n-th candidate fails; the run still completes.
    pub fail_every_nth_iteration: Option<u32>,
    /// Every candidate fails and the run ends `Failed`.
    pub fail_all_candidates: bool,
    pub seed: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            location: "eastus".to_string(),
            provisioning_polls: 2,
            provisioning_failure: None,
            iterations_per_run: 12,
            fail_every_nth_iteration: None,
            fail_all_candidates: false,
            seed: 42,
        }
    }
}

/// A recorded `submit_automl` call, accepted or not.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub workspace: String,
    pub experiment: String,
    pub config: AutoMlConfig,
    pub run_id: Option<RunId>,
}

#[derive(Debug)]
struct SandboxCompute {
    target: ComputeTarget,
    polls_remaining: u32,
}

#[derive(Debug)]
struct SandboxRun {
    workspace: String,
    snapshot: RunSnapshot,
    config: AutoMlConfig,
    rng: ChaCha8Rng,
}

#[derive(Debug, Default)]
struct WorkspaceState {
    workspace: Option<Workspace>,
    computes: HashMap<String, SandboxCompute>,
    datasets: HashMap<String, DatasetRef>,
}

#[derive(Debug, Default)]
struct SandboxState {
    workspaces: HashMap<String, WorkspaceState>,
    runs: HashMap<RunId, SandboxRun>,
    creation_requests: Vec<ComputeSpec>,
    submissions: Vec<Submission>,
}

/// A fully in-process platform.
#[derive(Debug)]
pub struct SandboxPlatform {
    config: SandboxConfig,
    state: Mutex<SandboxState>,
}

impl SandboxPlatform {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SandboxState::default()),
        }
    }

    /// Create a sandbox with default settings.
    pub fn with_defaults() -> Self {
        Self::new(SandboxConfig::default())
    }

    /// Register a workspace the sandbox will resolve.
    pub fn with_workspace(self, config: &WorkspaceConfig) -> Self {
        let workspace = Workspace::from_config(config, self.config.location.clone());
        let name = workspace.name.clone();
        self.state.lock().workspaces.entry(name).or_default().workspace = Some(workspace);
        self
    }

    /// Register a tabular dataset with the given schema, returning its
    /// reference. Re-registering a name bumps its version.
    pub fn register_dataset<I, S>(&self, workspace: &str, name: &str, columns: I) -> DatasetRef
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        let ws = state.workspaces.entry(workspace.to_string()).or_default();
        let version = ws
            .datasets
            .get(name)
            .and_then(|d| d.version.parse::<u32>().ok())
            .map_or(1, |v| v + 1);
        let dataset = DatasetRef::new(Uuid::new_v4().to_string(), name, version.to_string())
            .with_columns(columns);
        ws.datasets.insert(name.to_string(), dataset.clone());
        dataset
    }

    /// Place a compute target directly, bypassing creation requests.
    pub fn insert_compute(&self, workspace: &str, target: ComputeTarget) {
        let mut state = self.state.lock();
        let ws = state.workspaces.entry(workspace.to_string()).or_default();
        ws.computes.insert(
            target.name.clone(),
            SandboxCompute {
                polls_remaining: self.config.provisioning_polls,
                target,
            },
        );
    }

    /// Every `create_compute` call received so far.
    pub fn creation_requests(&self) -> Vec<ComputeSpec> {
        self.state.lock().creation_requests.clone()
    }

    /// Every `submit_automl` call received so far.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    fn advance_compute(&self, compute: &mut SandboxCompute) {
        if compute.target.state != ComputeState::Provisioning {
            return;
        }
        if compute.polls_remaining > 0 {
            compute.polls_remaining -= 1;
        }
        if compute.polls_remaining == 0 {
            match &self.config.provisioning_failure {
                Some(message) => {
                    compute.target.state = ComputeState::Failed {
                        message: message.clone(),
                    };
                }
                None => {
                    compute.target.state = ComputeState::Ready;
                    compute.target.current_nodes = compute.target.min_nodes;
                }
            }
            info!(
                compute = %compute.target.name,
                state = %compute.target.state,
                "sandbox: compute provisioning settled"
            );
        }
    }

    fn iteration_fails(&self, iteration: u32) -> bool {
        if self.config.fail_all_candidates {
            return true;
        }
        match self.config.fail_every_nth_iteration {
            Some(n) if n > 0 => (iteration + 1) % n == 0,
            _ => false,
        }
    }

    /// Reveal the next child iteration of a running job.
    fn next_iteration(&self, run: &mut SandboxRun) -> IterationRecord {
        let iteration = run.snapshot.iterations.len() as u32;
        let total = self.config.iterations_per_run;
        let duration_seconds = run.rng.random_range(20..90);

        let ensemble = match total.checked_sub(iteration) {
            Some(2) if total >= 3 => Some("VotingEnsemble"),
            Some(1) if total >= 3 => Some("StackEnsemble"),
            _ => None,
        };
        let best_so_far = run.snapshot.best_iteration().and_then(|i| i.score);

        let (pipeline, score) = match ensemble {
            Some(name) => {
                let lift: f64 = run.rng.random_range(0.0..0.01);
                (name.to_string(), best_so_far.map(|b| (b + lift).min(1.0)))
            }
            None => {
                let pipeline = PIPELINES[iteration as usize % PIPELINES.len()].to_string();
                let score: f64 = run.rng.random_range(0.80..0.95);
                let score = if self.iteration_fails(iteration) { None } else { Some(score) };
                (pipeline, score)
            }
        };

        IterationRecord {
            iteration,
            pipeline,
            duration_seconds,
            status: if score.is_some() {
                IterationStatus::Completed
            } else {
                IterationStatus::Failed
            },
            score,
        }
    }

    fn advance_run(&self, run: &mut SandboxRun) {
        match run.snapshot.status {
            RunStatus::NotStarted | RunStatus::Queued | RunStatus::Preparing => {
                run.snapshot.status = RunStatus::Running;
                run.snapshot.started_at = Some(Utc::now());
            }
            RunStatus::Running => {
                if (run.snapshot.iterations.len() as u32) < self.config.iterations_per_run {
                    let record = self.next_iteration(run);
                    debug!(
                        run_id = %run.snapshot.run_id,
                        iteration = record.iteration,
                        pipeline = %record.pipeline,
                        "sandbox: iteration finished"
                    );
                    run.snapshot.iterations.push(record);
                } else {
                    run.snapshot.status = RunStatus::Finalizing;
                }
            }
            RunStatus::Finalizing => {
                if run.snapshot.completed_iterations() == 0 {
                    run.snapshot.status = RunStatus::Failed;
                    run.snapshot.error =
                        Some("no candidate pipeline completed successfully".to_string());
                } else {
                    run.snapshot.status = RunStatus::Completed;
                }
                run.snapshot.finished_at = Some(Utc::now());
            }
            RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled => {}
        }
    }

    fn validate_submission(ws: &WorkspaceState, config: &AutoMlConfig) -> Result<(), String> {
        let compute = ws
            .computes
            .get(config.compute_target())
            .ok_or_else(|| format!("compute target '{}' not found", config.compute_target()))?;
        if compute.target.kind != ComputeKind::AmlCompute {
            return Err(format!(
                "compute target '{}' is a {}; AutoML runs need an AmlCompute cluster",
                compute.target.name, compute.target.kind
            ));
        }
        if let ComputeState::Failed { message } = &compute.target.state {
            return Err(format!("compute target '{}' is in a failed state: {}", compute.target.name, message));
        }

        let view = config.training_data();
        if !ws.datasets.values().any(|d| d.id == view.source_id()) {
            return Err(format!("training dataset '{}' is not registered", view.source().name));
        }
        let unknown = view.unknown_dropped_columns();
        if !unknown.is_empty() {
            return Err(format!("columns not found in dataset: {}", unknown.join(", ")));
        }
        if let Some(retained) = view.retained_columns() {
            if !retained.iter().any(|c| c == config.label_column_name()) {
                return Err(format!(
                    "label column '{}' is not present in the training data",
                    config.label_column_name()
                ));
            }
        }

        if config.n_cross_validations() < 2 {
            return Err(format!(
                "n_cross_validations must be at least 2, got {}",
                config.n_cross_validations()
            ));
        }
        if config.max_concurrent_iterations() == 0 {
            return Err("max_concurrent_iterations must be at least 1".to_string());
        }
        if config.max_concurrent_iterations() > compute.target.max_nodes {
            return Err(format!(
                "max_concurrent_iterations ({}) exceeds the maximum node count of '{}' ({})",
                config.max_concurrent_iterations(),
                compute.target.name,
                compute.target.max_nodes
            ));
        }
        if config.experiment_timeout() < MIN_EXPERIMENT_TIMEOUT {
            return Err(format!(
                "experiment timeout must be at least 15 minutes, got {} hours",
                config.experiment_timeout_hours()
            ));
        }
        if config.iteration_timeout() > config.experiment_timeout() {
            return Err("iteration timeout exceeds the experiment timeout".to_string());
        }
        Ok(())
    }
}

fn workspace_not_found(name: &str) -> PlatformError {
    PlatformError::NotFound {
        kind: "Workspace".to_string(),
        name: name.to_string(),
    }
}

fn run_not_found(run_id: &RunId) -> PlatformError {
    PlatformError::NotFound {
        kind: "Run".to_string(),
        name: run_id.to_string(),
    }
}

#[async_trait]
impl Platform for SandboxPlatform {
    async fn get_workspace(&self, config: &WorkspaceConfig) -> ApResult<Workspace> {
        let state = self.state.lock();
        let workspace = state
            .workspaces
            .get(&config.workspace_name)
            .and_then(|ws| ws.workspace.as_ref())
            .filter(|ws| {
                ws.subscription_id == config.subscription_id
                    && ws.resource_group == config.resource_group
            })
            .cloned()
            .ok_or_else(|| workspace_not_found(&config.workspace_name))?;
        Ok(workspace)
    }

    async fn get_compute(&self, workspace: &Workspace, name: &str) -> ApResult<Option<ComputeTarget>> {
        let mut state = self.state.lock();
        let ws = state
            .workspaces
            .get_mut(&workspace.name)
            .ok_or_else(|| workspace_not_found(&workspace.name))?;
        Ok(ws.computes.get_mut(name).map(|compute| {
            self.advance_compute(compute);
            compute.target.clone()
        }))
    }

    async fn create_compute(&self, workspace: &Workspace, spec: &ComputeSpec) -> ApResult<ComputeTarget> {
        let mut state = self.state.lock();
        state.creation_requests.push(spec.clone());

        let ws = state
            .workspaces
            .get_mut(&workspace.name)
            .ok_or_else(|| workspace_not_found(&workspace.name))?;
        if let Some(existing) = ws.computes.get(&spec.name) {
            return Err(PlatformError::Conflict {
                message: format!(
                    "compute name '{}' is already used by a {}",
                    spec.name, existing.target.kind
                ),
            }
            .into());
        }

        let mut compute = SandboxCompute {
            target: ComputeTarget::provisioning(spec),
            polls_remaining: self.config.provisioning_polls,
        };
        if compute.polls_remaining == 0 {
            self.advance_compute(&mut compute);
        }
        let target = compute.target.clone();
        ws.computes.insert(spec.name.clone(), compute);

        info!(
            compute = %spec.name,
            vm_size = %spec.vm_size,
            min_nodes = spec.min_nodes,
            max_nodes = spec.max_nodes,
            "sandbox: compute creation accepted"
        );
        Ok(target)
    }

    async fn get_dataset(&self, workspace: &Workspace, name: &str) -> ApResult<DatasetRef> {
        let state = self.state.lock();
        let ws = state
            .workspaces
            .get(&workspace.name)
            .ok_or_else(|| workspace_not_found(&workspace.name))?;
        let dataset = ws.datasets.get(name).cloned().ok_or_else(|| PlatformError::NotFound {
            kind: "Dataset".to_string(),
            name: name.to_string(),
        })?;
        Ok(dataset)
    }

    async fn submit_automl(
        &self,
        workspace: &Workspace,
        experiment: &str,
        config: &AutoMlConfig,
    ) -> ApResult<RunId> {
        let mut state = self.state.lock();
        let run_index = state.submissions.len() as u64;
        let mut submission = Submission {
            workspace: workspace.name.clone(),
            experiment: experiment.to_string(),
            config: config.clone(),
            run_id: None,
        };

        let verdict = state
            .workspaces
            .get(&workspace.name)
            .map(|ws| Self::validate_submission(ws, config));
        match verdict {
            None => {
                state.submissions.push(submission);
                return Err(workspace_not_found(&workspace.name).into());
            }
            Some(Err(message)) => {
                state.submissions.push(submission);
                return Err(RunError::SubmissionRejected { message }.into());
            }
            Some(Ok(())) => {}
        }

        let run_id = RunId::new(format!("AutoML_{}", Uuid::new_v4()));
        let mut snapshot = RunSnapshot::new(run_id.clone(), experiment);
        snapshot.status = RunStatus::Queued;
        state.runs.insert(
            run_id.clone(),
            SandboxRun {
                workspace: workspace.name.clone(),
                snapshot,
                config: config.clone(),
                rng: ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(run_index)),
            },
        );
        submission.run_id = Some(run_id.clone());
        state.submissions.push(submission);

        info!(run_id = %run_id, experiment = %experiment, "sandbox: AutoML run queued");
        Ok(run_id)
    }

    async fn get_run(&self, workspace: &Workspace, run_id: &RunId) -> ApResult<RunSnapshot> {
        let mut state = self.state.lock();
        let run = state
            .runs
            .get_mut(run_id)
            .filter(|r| r.workspace == workspace.name)
            .ok_or_else(|| run_not_found(run_id))?;
        self.advance_run(run);
        Ok(run.snapshot.clone())
    }

    async fn get_best_run(&self, workspace: &Workspace, run_id: &RunId) -> ApResult<(BestRun, ModelHandle)> {
        let state = self.state.lock();
        let run = state
            .runs
            .get(run_id)
            .filter(|r| r.workspace == workspace.name)
            .ok_or_else(|| run_not_found(run_id))?;

        if !run.snapshot.status.is_terminal() {
            return Err(PlatformError::Conflict {
                message: format!("run {} is still {}", run_id, run.snapshot.status),
            }
            .into());
        }
        let best = run
            .snapshot
            .best_iteration()
            .ok_or_else(|| RunError::NoBestRun {
                run_id: run_id.to_string(),
            })?;

        let child = run_id.child(best.iteration);
        let short: String = run_id
            .as_str()
            .trim_start_matches("AutoML_")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(10)
            .collect();
        let best_run = BestRun {
            run_id: child.clone(),
            parent_run_id: run_id.clone(),
            iteration: Some(best.iteration),
            pipeline: Some(best.pipeline.clone()),
            metric: run.config.primary_metric().as_str().to_string(),
            score: best.score,
        };
        let model = ModelHandle {
            name: format!("AutoML{}{}", short, best.iteration),
            run_id: child,
            algorithm: Some(best.pipeline.clone()),
        };
        Ok((best_run, model))
    }
}
