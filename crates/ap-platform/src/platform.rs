//! Platform interface.

use ap_types::{
    ApResult, AutoMlConfig, BestRun, ComputeSpec, ComputeTarget, DatasetRef, ModelHandle, RunId,
    RunSnapshot, Workspace, WorkspaceConfig,
};
use async_trait::async_trait;

/// Operations the driver needs from the managed ML platform.
///
/// Every call takes the workspace explicitly; implementations hold no
/// ambient workspace. Errors are whatever the platform reports, mapped
/// onto [`ap_types::ApError`] without retries.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Resolve the handle of an existing workspace.
    async fn get_workspace(&self, config: &WorkspaceConfig) -> ApResult<Workspace>;

    // -- Compute ------------------------------------------------------------

    /// Look up a compute target by name. `Ok(None)` when nothing by that
    /// name exists.
    async fn get_compute(&self, workspace: &Workspace, name: &str) -> ApResult<Option<ComputeTarget>>;

    /// Request creation of a compute target. Returns as soon as the
    /// request is accepted; the target is usually still provisioning.
    async fn create_compute(&self, workspace: &Workspace, spec: &ComputeSpec) -> ApResult<ComputeTarget>;

    // -- Data ---------------------------------------------------------------

    /// Latest version of a registered dataset.
    async fn get_dataset(&self, workspace: &Workspace, name: &str) -> ApResult<DatasetRef>;

    // -- Runs ---------------------------------------------------------------

    /// Submit an AutoML job under `experiment`. Validation failures surface
    /// here as [`ap_types::RunError::SubmissionRejected`].
    async fn submit_automl(
        &self,
        workspace: &Workspace,
        experiment: &str,
        config: &AutoMlConfig,
    ) -> ApResult<RunId>;

    /// Current state of a run, including the child iterations seen so far.
    async fn get_run(&self, workspace: &Workspace, run_id: &RunId) -> ApResult<RunSnapshot>;

    /// Best child run of a finished AutoML run and its fitted model.
    async fn get_best_run(&self, workspace: &Workspace, run_id: &RunId) -> ApResult<(BestRun, ModelHandle)>;
}
