//! Run plan: every literal the driver submits, loadable from JSON.

use ap_types::{hours_to_duration, ApResult, AutoMlSettings, ComputeSpec};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Metadata columns removed before training. Only the article text and the
/// label remain.
pub const EXCLUDED_COLUMNS: [&str; 18] = [
    "cord_uid",
    "sha",
    "source_x",
    "title",
    "doi",
    "pmcid",
    "pubmed_id",
    "license",
    "publish_time",
    "authors",
    "journal",
    "mag_id",
    "who_covidence_id",
    "arxiv_id",
    "pdf_json_files",
    "pmc_json_files",
    "url",
    "s2_id",
];

/// Everything one driver invocation needs besides the workspace.
///
/// Missing fields in a plan file fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPlan {
    pub experiment_name: String,
    pub compute: ComputeSpec,
    pub dataset_name: String,
    pub excluded_columns: Vec<String>,
    pub settings: AutoMlSettings,
    pub provisioning_timeout_minutes: u64,
    /// Added to the experiment timeout to bound the completion wait.
    pub run_timeout_grace_minutes: u64,
    pub poll_interval_seconds: u64,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            experiment_name: "covid19-articles-automl".to_string(),
            compute: ComputeSpec::cluster("aml-compute-cpu", "STANDARD_D2_V2", 0, 4),
            dataset_name: "COVID19Articles_Train".to_string(),
            excluded_columns: EXCLUDED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            settings: AutoMlSettings::default(),
            provisioning_timeout_minutes: 20,
            run_timeout_grace_minutes: 15,
            poll_interval_seconds: 10,
        }
    }
}

impl RunPlan {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ApResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_minutes.saturating_mul(60))
    }

    /// Experiment timeout plus grace, saturating at `Duration::MAX`.
    pub fn run_timeout(&self) -> Duration {
        let grace = Duration::from_secs(self.run_timeout_grace_minutes.saturating_mul(60));
        hours_to_duration(self.settings.experiment_timeout_hours).saturating_add(grace)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}
