//! AutoML training-job configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::dataset::DatasetView;
use crate::errors::{ApError, ApResult};

/// Kind of learning task. Only classification is driven from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Classification,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
        }
    }
}

/// Scalar score used to rank candidate pipelines. Every supported metric
/// is maximized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimaryMetric {
    #[serde(rename = "AUC_weighted")]
    AucWeighted,
    #[serde(rename = "accuracy")]
    Accuracy,
    #[serde(rename = "norm_macro_recall")]
    NormMacroRecall,
    #[serde(rename = "average_precision_score_weighted")]
    AveragePrecisionScoreWeighted,
    #[serde(rename = "precision_score_weighted")]
    PrecisionScoreWeighted,
}

impl PrimaryMetric {
    pub const ALL: [PrimaryMetric; 5] = [
        Self::AucWeighted,
        Self::Accuracy,
        Self::NormMacroRecall,
        Self::AveragePrecisionScoreWeighted,
        Self::PrecisionScoreWeighted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AucWeighted => "AUC_weighted",
            Self::Accuracy => "accuracy",
            Self::NormMacroRecall => "norm_macro_recall",
            Self::AveragePrecisionScoreWeighted => "average_precision_score_weighted",
            Self::PrecisionScoreWeighted => "precision_score_weighted",
        }
    }
}

impl fmt::Display for PrimaryMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimaryMetric {
    type Err = ApError;

    fn from_str(s: &str) -> ApResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| crate::validation_error!("unknown primary metric: {}", s))
    }
}

/// Literal settings for a run, as written in a run plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoMlSettings {
    pub primary_metric: PrimaryMetric,
    pub label_column_name: String,
    pub n_cross_validations: u32,
    pub experiment_timeout_hours: f64,
    pub iteration_timeout_minutes: u32,
    pub max_concurrent_iterations: u32,
}

impl Default for AutoMlSettings {
    fn default() -> Self {
        Self {
            primary_metric: PrimaryMetric::AucWeighted,
            label_column_name: "cluster".to_string(),
            n_cross_validations: 5,
            experiment_timeout_hours: 0.25,
            iteration_timeout_minutes: 10,
            max_concurrent_iterations: 4,
        }
    }
}

/// Immutable job configuration. Built once through the `with_*` chain,
/// then handed to submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoMlConfig {
    task: TaskType,
    primary_metric: PrimaryMetric,
    label_column_name: String,
    n_cross_validations: u32,
    experiment_timeout_hours: f64,
    iteration_timeout_minutes: u32,
    max_concurrent_iterations: u32,
    compute_target: String,
    training_data: DatasetView,
}

impl AutoMlConfig {
    /// Classification job with [`AutoMlSettings::default`] values for
    /// everything not named here.
    pub fn classification(
        label_column_name: impl Into<String>,
        compute_target: impl Into<String>,
        training_data: DatasetView,
    ) -> Self {
        let defaults = AutoMlSettings::default();
        Self {
            task: TaskType::Classification,
            primary_metric: defaults.primary_metric,
            label_column_name: label_column_name.into(),
            n_cross_validations: defaults.n_cross_validations,
            experiment_timeout_hours: defaults.experiment_timeout_hours,
            iteration_timeout_minutes: defaults.iteration_timeout_minutes,
            max_concurrent_iterations: defaults.max_concurrent_iterations,
            compute_target: compute_target.into(),
            training_data,
        }
    }

    pub fn from_settings(
        settings: &AutoMlSettings,
        compute_target: impl Into<String>,
        training_data: DatasetView,
    ) -> Self {
        Self::classification(settings.label_column_name.clone(), compute_target, training_data)
            .with_primary_metric(settings.primary_metric)
            .with_cross_validations(settings.n_cross_validations)
            .with_experiment_timeout_hours(settings.experiment_timeout_hours)
            .with_iteration_timeout_minutes(settings.iteration_timeout_minutes)
            .with_max_concurrent_iterations(settings.max_concurrent_iterations)
    }

    pub fn with_primary_metric(mut self, metric: PrimaryMetric) -> Self {
        self.primary_metric = metric;
        self
    }

    pub fn with_cross_validations(mut self, folds: u32) -> Self {
        self.n_cross_validations = folds;
        self
    }

    pub fn with_experiment_timeout_hours(mut self, hours: f64) -> Self {
        self.experiment_timeout_hours = hours;
        self
    }

    pub fn with_iteration_timeout_minutes(mut self, minutes: u32) -> Self {
        self.iteration_timeout_minutes = minutes;
        self
    }

    pub fn with_max_concurrent_iterations(mut self, n: u32) -> Self {
        self.max_concurrent_iterations = n;
        self
    }

    pub fn task(&self) -> TaskType {
        self.task
    }

    pub fn primary_metric(&self) -> PrimaryMetric {
        self.primary_metric
    }

    pub fn label_column_name(&self) -> &str {
        &self.label_column_name
    }

    pub fn n_cross_validations(&self) -> u32 {
        self.n_cross_validations
    }

    pub fn experiment_timeout_hours(&self) -> f64 {
        self.experiment_timeout_hours
    }

    pub fn iteration_timeout_minutes(&self) -> u32 {
        self.iteration_timeout_minutes
    }

    pub fn max_concurrent_iterations(&self) -> u32 {
        self.max_concurrent_iterations
    }

    pub fn compute_target(&self) -> &str {
        &self.compute_target
    }

    pub fn training_data(&self) -> &DatasetView {
        &self.training_data
    }

    /// Wall-clock budget of the whole search. Negative or NaN hours clamp
    /// to zero; values past the `Duration` range saturate.
    pub fn experiment_timeout(&self) -> Duration {
        hours_to_duration(self.experiment_timeout_hours)
    }

    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.iteration_timeout_minutes) * 60)
    }
}

/// Saturating conversion of fractional hours, shared by everything that
/// turns a configured hour count into a wait bound.
pub fn hours_to_duration(hours: f64) -> Duration {
    let secs = hours * 3600.0;
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
