//! Compute targets and their provisioning lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of compute resource attached to a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputeKind {
    /// Autoscaling training cluster.
    AmlCompute,
    /// Single managed development VM.
    ComputeInstance,
}

impl ComputeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmlCompute => "AmlCompute",
            Self::ComputeInstance => "ComputeInstance",
        }
    }
}

impl fmt::Display for ComputeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired shape of a compute target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeSpec {
    pub name: String,
    pub kind: ComputeKind,
    /// Machine-size descriptor, e.g. "STANDARD_D2_V2".
    pub vm_size: String,
    pub min_nodes: u32,
    pub max_nodes: u32,
    /// Idle time before the cluster scales back to `min_nodes`.
    #[serde(default)]
    pub idle_seconds_before_scaledown: Option<u32>,
}

impl ComputeSpec {
    pub fn cluster(name: impl Into<String>, vm_size: impl Into<String>, min_nodes: u32, max_nodes: u32) -> Self {
        Self {
            name: name.into(),
            kind: ComputeKind::AmlCompute,
            vm_size: vm_size.into(),
            min_nodes,
            max_nodes,
            idle_seconds_before_scaledown: None,
        }
    }

    pub fn with_idle_scaledown(mut self, seconds: u32) -> Self {
        self.idle_seconds_before_scaledown = Some(seconds);
        self
    }
}

/// Provisioning lifecycle of a compute target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeState {
    Absent,
    Provisioning,
    Ready,
    Failed { message: String },
}

impl ComputeState {
    /// `Ready` and `Failed` do not change without outside action.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed { .. })
    }
}

impl fmt::Display for ComputeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("Absent"),
            Self::Provisioning => f.write_str("Provisioning"),
            Self::Ready => f.write_str("Ready"),
            Self::Failed { message } => write!(f, "Failed ({message})"),
        }
    }
}

/// A compute target as currently known to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeTarget {
    pub name: String,
    pub kind: ComputeKind,
    pub vm_size: String,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub current_nodes: u32,
    pub state: ComputeState,
}

impl ComputeTarget {
    /// Target in the `Provisioning` state, as returned right after a
    /// creation request.
    pub fn provisioning(spec: &ComputeSpec) -> Self {
        Self {
            name: spec.name.clone(),
            kind: spec.kind,
            vm_size: spec.vm_size.clone(),
            min_nodes: spec.min_nodes,
            max_nodes: spec.max_nodes,
            current_nodes: 0,
            state: ComputeState::Provisioning,
        }
    }

    pub fn ready(spec: &ComputeSpec) -> Self {
        Self {
            current_nodes: spec.min_nodes,
            state: ComputeState::Ready,
            ..Self::provisioning(spec)
        }
    }

    pub fn matches_kind(&self, spec: &ComputeSpec) -> bool {
        self.name == spec.name && self.kind == spec.kind
    }

    pub fn is_ready(&self) -> bool {
        self.state == ComputeState::Ready
    }
}
