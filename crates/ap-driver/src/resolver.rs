//! Compute-target reconciliation.
//!
//! [`reconcile_compute`] drives a named target towards `Ready`: reuse it when
//! it already exists with the right kind, otherwise issue one creation
//! request and wait for provisioning to settle.

use ap_platform::Platform;
use ap_types::{
    ApResult, ComputeError, ComputeSpec, ComputeState, ComputeTarget, ProgressEvent, Workspace,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::wait::{WaitInterrupt, WaitOptions, Waiter};

pub const DEFAULT_PROVISIONING_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// What reconciliation had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// A ready target of the right kind already existed.
    Reused,
    /// A target of the right kind was still provisioning; waited for it.
    AwaitedExisting,
    /// A creation request was issued.
    Created,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciled {
    pub target: ComputeTarget,
    pub action: ReconcileAction,
}

/// Bring `spec.name` to `Ready`, creating it at most once.
pub async fn reconcile_compute(
    platform: &dyn Platform,
    workspace: &Workspace,
    spec: &ComputeSpec,
    opts: &WaitOptions,
) -> ApResult<Reconciled> {
    let existing = platform.get_compute(workspace, &spec.name).await?;

    let (current, action) = match existing {
        Some(target) if target.matches_kind(spec) => match target.state.clone() {
            ComputeState::Ready => {
                info!(compute = %target.name, nodes = target.current_nodes, "found existing compute target, reusing it");
                emit_state(opts, &target);
                return Ok(Reconciled {
                    target,
                    action: ReconcileAction::Reused,
                });
            }
            ComputeState::Provisioning => {
                info!(compute = %target.name, "compute target is still provisioning");
                (target, ReconcileAction::AwaitedExisting)
            }
            ComputeState::Failed { message } => {
                return Err(ComputeError::ProvisioningFailed {
                    name: target.name,
                    message,
                }
                .into());
            }
            ComputeState::Absent => (create(platform, workspace, spec, opts).await?, ReconcileAction::Created),
        },
        Some(target) => {
            warn!(
                compute = %spec.name,
                found = %target.kind,
                wanted = %spec.kind,
                "compute name is taken by a different kind of target"
            );
            (create(platform, workspace, spec, opts).await?, ReconcileAction::Created)
        }
        None => (create(platform, workspace, spec, opts).await?, ReconcileAction::Created),
    };

    let target = wait_for_compute(platform, workspace, current, opts).await?;
    Ok(Reconciled { target, action })
}

async fn create(
    platform: &dyn Platform,
    workspace: &Workspace,
    spec: &ComputeSpec,
    opts: &WaitOptions,
) -> ApResult<ComputeTarget> {
    if opts.is_cancelled() {
        return Err(ComputeError::WaitCancelled {
            name: spec.name.clone(),
        }
        .into());
    }
    info!(
        compute = %spec.name,
        vm_size = %spec.vm_size,
        min_nodes = spec.min_nodes,
        max_nodes = spec.max_nodes,
        "creating compute target"
    );
    platform.create_compute(workspace, spec).await
}

fn emit_state(opts: &WaitOptions, target: &ComputeTarget) {
    opts.emit(ProgressEvent::Compute {
        name: target.name.clone(),
        state: target.state.clone(),
        current_nodes: target.current_nodes,
    });
}

/// Poll until `initial` settles. `Failed` and timeouts are terminal.
pub async fn wait_for_compute(
    platform: &dyn Platform,
    workspace: &Workspace,
    initial: ComputeTarget,
    opts: &WaitOptions,
) -> ApResult<ComputeTarget> {
    let waiter = Waiter::start(opts);
    let name = initial.name.clone();
    let interrupted = |interrupt: WaitInterrupt| match interrupt {
        WaitInterrupt::TimedOut => ComputeError::ProvisioningTimeout {
            name: name.clone(),
            timeout_seconds: opts.timeout.as_secs(),
        },
        WaitInterrupt::Cancelled => ComputeError::WaitCancelled { name: name.clone() },
    };

    let mut target = initial;
    let mut last_state = None;
    loop {
        if last_state.as_ref() != Some(&target.state) {
            info!(compute = %target.name, state = %target.state, nodes = target.current_nodes, "compute state");
            last_state = Some(target.state.clone());
        }
        emit_state(waiter.options(), &target);

        if target.state.is_settled() {
            if target.is_ready() {
                return Ok(target);
            }
            let message = match &target.state {
                ComputeState::Failed { message } => message.clone(),
                other => other.to_string(),
            };
            return Err(ComputeError::ProvisioningFailed {
                name: target.name.clone(),
                message,
            }
            .into());
        }

        waiter.pause().await.map_err(&interrupted)?;
        target = platform
            .get_compute(workspace, &name)
            .await?
            .ok_or_else(|| ComputeError::ProvisioningFailed {
                name: name.clone(),
                message: "target disappeared while provisioning".to_string(),
            })?;
    }
}
