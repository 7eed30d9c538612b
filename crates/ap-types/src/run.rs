//! Submitted runs, their child iterations and the results read back from
//! the platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::compute::ComputeState;

/// Platform-assigned run identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of the `iteration`-th child of this parent run.
    pub fn child(&self, iteration: u32) -> Self {
        Self(format!("{}_{}", self.0, iteration))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a run as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    NotStarted,
    Queued,
    Preparing,
    Running,
    Finalizing,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Parse the status string used by the REST surface. Unrecognized
    /// values map to `None`.
    pub fn from_platform(s: &str) -> Option<Self> {
        let status = match s {
            "NotStarted" => Self::NotStarted,
            "Queued" | "Starting" | "Provisioning" => Self::Queued,
            "Preparing" => Self::Preparing,
            "Running" => Self::Running,
            "Finalizing" | "CancelRequested" => Self::Finalizing,
            "Completed" => Self::Completed,
            "Failed" | "NotResponding" => Self::Failed,
            "Canceled" => Self::Canceled,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IterationStatus {
    Completed,
    Failed,
}

/// One candidate pipeline evaluated inside the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub pipeline: String,
    pub duration_seconds: u64,
    /// Primary-metric score; `None` when the candidate failed.
    pub score: Option<f64>,
    pub status: IterationStatus,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub experiment: String,
    pub status: RunStatus,
    /// Child iterations observed so far, in iteration order.
    pub iterations: Vec<IterationRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunSnapshot {
    pub fn new(run_id: RunId, experiment: impl Into<String>) -> Self {
        Self {
            run_id,
            experiment: experiment.into(),
            status: RunStatus::NotStarted,
            iterations: Vec::new(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn completed_iterations(&self) -> usize {
        self.iterations
            .iter()
            .filter(|i| i.status == IterationStatus::Completed)
            .count()
    }

    pub fn failed_iterations(&self) -> usize {
        self.iterations
            .iter()
            .filter(|i| i.status == IterationStatus::Failed)
            .count()
    }

    /// Highest-scoring completed iteration.
    pub fn best_iteration(&self) -> Option<&IterationRecord> {
        let mut best: Option<(f64, &IterationRecord)> = None;
        for record in &self.iterations {
            if let Some(score) = record.score {
                if best.map_or(true, |(best_score, _)| score > best_score) {
                    best = Some((score, record));
                }
            }
        }
        best.map(|(_, record)| record)
    }
}

/// Best child run picked by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestRun {
    pub run_id: RunId,
    pub parent_run_id: RunId,
    pub iteration: Option<u32>,
    pub pipeline: Option<String>,
    pub metric: String,
    pub score: Option<f64>,
}

/// Fitted model produced by the best run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub name: String,
    pub run_id: RunId,
    pub algorithm: Option<String>,
}

/// Progress notification emitted while the driver waits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    Compute {
        name: String,
        state: ComputeState,
        current_nodes: u32,
    },
    RunStatus {
        run_id: RunId,
        status: RunStatus,
    },
    Iteration {
        record: IterationRecord,
        /// Best score observed up to and including this iteration.
        best_score: Option<f64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: u32, score: Option<f64>) -> IterationRecord {
        IterationRecord {
            iteration,
            pipeline: "MaxAbsScaler LightGBM".into(),
            duration_seconds: 30,
            status: if score.is_some() {
                IterationStatus::Completed
            } else {
                IterationStatus::Failed
            },
            score,
        }
    }

    #[test]
    fn test_child_ids_are_suffixed() {
        let parent = RunId::new("AutoML_abc");
        assert_eq!(parent.child(7).as_str(), "AutoML_abc_7");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(!RunStatus::Finalizing.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
    }

    #[test]
    fn test_platform_status_strings() {
        assert_eq!(RunStatus::from_platform("Starting"), Some(RunStatus::Queued));
        assert_eq!(RunStatus::from_platform("Completed"), Some(RunStatus::Completed));
        assert_eq!(RunStatus::from_platform("Paused"), None);
    }

    #[test]
    fn test_best_iteration_ignores_failures() {
        let mut snapshot = RunSnapshot::new(RunId::new("r"), "exp");
        snapshot.iterations = vec![
            record(0, Some(0.81)),
            record(1, None),
            record(2, Some(0.93)),
            record(3, Some(0.90)),
        ];

        assert_eq!(snapshot.best_iteration().unwrap().iteration, 2);
        assert_eq!(snapshot.completed_iterations(), 3);
        assert_eq!(snapshot.failed_iterations(), 1);
    }

    #[test]
    fn test_best_iteration_keeps_first_on_tie() {
        let mut snapshot = RunSnapshot::new(RunId::new("r"), "exp");
        snapshot.iterations = vec![record(0, Some(0.9)), record(1, Some(0.9))];
        assert_eq!(snapshot.best_iteration().unwrap().iteration, 0);
    }

    #[test]
    fn test_no_best_when_everything_failed() {
        let mut snapshot = RunSnapshot::new(RunId::new("r"), "exp");
        snapshot.iterations = vec![record(0, None)];
        assert!(snapshot.best_iteration().is_none());
    }
}
