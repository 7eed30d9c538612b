//! REST client for the management API of the managed ML platform.
//!
//! Compute and job resources live under the workspace resource id. Request
//! and response bodies are handled as `serde_json::Value` and converted at
//! the edges; the conversion helpers are plain functions so they can be
//! tested without a network.

use ap_types::{
    ApError, ApResult, AutoMlConfig, BestRun, ComputeKind, ComputeSpec, ComputeState,
    ComputeTarget, DatasetRef, ModelHandle, PlatformError, PrimaryMetric, RunError, RunId,
    RunSnapshot, RunStatus, Workspace, WorkspaceConfig,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::platform::Platform;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
pub const API_VERSION: &str = "2023-10-01";

/// Environment variable holding the bearer token.
pub const TOKEN_ENV: &str = "AUTOML_PILOT_TOKEN";
/// Environment variable overriding [`DEFAULT_ENDPOINT`].
pub const ENDPOINT_ENV: &str = "AUTOML_PILOT_ENDPOINT";

/// Property the service sets on a finished AutoML parent job.
const BEST_CHILD_PROPERTY: &str = "automl_best_child_run_id";

#[derive(Debug, Clone)]
pub struct AzureMlClientConfig {
    pub endpoint: String,
    pub api_version: String,
    pub token: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl AzureMlClientConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_version: API_VERSION.to_string(),
            token: token.into(),
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Token from `AUTOML_PILOT_TOKEN`, endpoint from
    /// `AUTOML_PILOT_ENDPOINT` when set.
    pub fn from_env() -> ApResult<Self> {
        let token = std::env::var(TOKEN_ENV)
            .map_err(|_| ap_types::config_error!("{} is not set", TOKEN_ENV))?;
        let mut config = Self::new(token);
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            config.endpoint = endpoint;
        }
        Ok(config)
    }
}

/// Platform implementation over HTTPS.
#[derive(Debug, Clone)]
pub struct AzureMlClient {
    http: reqwest::Client,
    config: AzureMlClientConfig,
}

fn transport(err: reqwest::Error) -> ApError {
    PlatformError::Transport {
        message: err.to_string(),
    }
    .into()
}

/// Pull `error.message` out of a management API error body, falling back
/// to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Map a non-success status onto the error taxonomy.
fn status_error(status: u16, body: &str, kind: &str, name: &str) -> ApError {
    let message = error_message(body);
    match status {
        401 | 403 => PlatformError::AuthenticationFailed { message }.into(),
        404 => PlatformError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
        .into(),
        409 => PlatformError::Conflict { message }.into(),
        _ => PlatformError::UnexpectedResponse { status, message }.into(),
    }
}

impl AzureMlClient {
    pub fn new(config: AzureMlClientConfig) -> ApResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(transport)?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            path,
            self.config.api_version
        )
    }

    /// GET a resource. `Ok(None)` on 404.
    async fn get_json(&self, path: &str, kind: &str, name: &str) -> ApResult<Option<Value>> {
        debug!(path, "GET");
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport)?;
        match status {
            200..=299 => Ok(Some(serde_json::from_str(&body)?)),
            404 => Ok(None),
            _ => Err(status_error(status, &body, kind, name)),
        }
    }

    async fn get_required(&self, path: &str, kind: &str, name: &str) -> ApResult<Value> {
        self.get_json(path, kind, name).await?.ok_or_else(|| {
            PlatformError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            }
            .into()
        })
    }

    /// PUT a resource body. Returns the status and raw response text.
    async fn put_json(&self, path: &str, body: &Value) -> ApResult<(u16, String)> {
        debug!(path, "PUT");
        let response = self
            .http
            .put(self.url(path))
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport)?;
        Ok((status, text))
    }
}

// ---------------------------------------------------------------------------
// Body conversions
// ---------------------------------------------------------------------------

pub(crate) fn parse_workspace(config: &WorkspaceConfig, body: &Value) -> Workspace {
    Workspace::from_config(config, body["location"].as_str().unwrap_or_default())
}

/// Missing counts read as zero; counts past `u32` saturate.
fn node_count(value: &Value) -> u32 {
    value.as_u64().map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

pub(crate) fn parse_compute(name: &str, body: &Value) -> ApResult<ComputeTarget> {
    let props = &body["properties"];
    let kind = match props["computeType"].as_str() {
        Some("AmlCompute") => ComputeKind::AmlCompute,
        Some("ComputeInstance") => ComputeKind::ComputeInstance,
        other => {
            return Err(PlatformError::UnexpectedResponse {
                status: 200,
                message: format!("compute '{}' has unsupported type {:?}", name, other),
            }
            .into())
        }
    };

    let inner = &props["properties"];
    let state = match props["provisioningState"].as_str() {
        Some("Succeeded") => ComputeState::Ready,
        Some("Creating") | Some("Updating") | Some("Unknown") | None => ComputeState::Provisioning,
        Some("Deleting") => ComputeState::Absent,
        Some(other) => ComputeState::Failed {
            message: props["provisioningErrors"][0]["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("provisioning state {}", other)),
        },
    };

    let scale = &inner["scaleSettings"];
    let (min_nodes, max_nodes) = match kind {
        ComputeKind::AmlCompute => (
            node_count(&scale["minNodeCount"]),
            node_count(&scale["maxNodeCount"]),
        ),
        ComputeKind::ComputeInstance => (1, 1),
    };

    Ok(ComputeTarget {
        name: name.to_string(),
        kind,
        vm_size: inner["vmSize"].as_str().unwrap_or_default().to_string(),
        min_nodes,
        max_nodes,
        current_nodes: node_count(&inner["currentNodeCount"]),
        state,
    })
}

/// ISO-8601 duration, minutes when exact.
fn iso_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs % 60 == 0 {
        format!("PT{}M", secs / 60)
    } else {
        format!("PT{}S", secs)
    }
}

pub(crate) fn compute_body(spec: &ComputeSpec, location: &str) -> Value {
    let mut properties = json!({ "vmSize": spec.vm_size });
    if spec.kind == ComputeKind::AmlCompute {
        let idle = spec.idle_seconds_before_scaledown.unwrap_or(120);
        properties["scaleSettings"] = json!({
            "minNodeCount": spec.min_nodes,
            "maxNodeCount": spec.max_nodes,
            "nodeIdleTimeBeforeScaleDown": iso_duration(Duration::from_secs(u64::from(idle))),
        });
    }
    json!({
        "location": location,
        "properties": {
            "computeType": spec.kind.as_str(),
            "properties": properties,
        }
    })
}

/// Metric names on the job surface differ from the settings names.
fn job_metric_name(metric: PrimaryMetric) -> &'static str {
    match metric {
        PrimaryMetric::AucWeighted => "AUCWeighted",
        PrimaryMetric::Accuracy => "Accuracy",
        PrimaryMetric::NormMacroRecall => "NormMacroRecall",
        PrimaryMetric::AveragePrecisionScoreWeighted => "AveragePrecisionScoreWeighted",
        PrimaryMetric::PrecisionScoreWeighted => "PrecisionScoreWeighted",
    }
}

/// Metric name as the SDK spells it (`AUC_weighted`). Unknown names pass
/// through unchanged.
fn sdk_metric_name(job_name: &str) -> String {
    PrimaryMetric::ALL
        .into_iter()
        .find(|m| job_metric_name(*m) == job_name || m.as_str() == job_name)
        .map_or_else(|| job_name.to_string(), |m| m.as_str().to_string())
}

pub(crate) fn automl_job_body(workspace: &Workspace, experiment: &str, config: &AutoMlConfig) -> Value {
    let data = config.training_data().source();
    json!({
        "properties": {
            "jobType": "AutoML",
            "experimentName": experiment,
            "computeId": format!("{}/computes/{}", workspace.resource_id(), config.compute_target()),
            "taskDetails": {
                "taskType": "Classification",
                "primaryMetric": job_metric_name(config.primary_metric()),
                "targetColumnName": config.label_column_name(),
                "trainingData": {
                    "jobInputType": "mltable",
                    "uri": format!("azureml:{}:{}", data.name, data.version),
                },
                "nCrossValidations": {
                    "mode": "Custom",
                    "value": config.n_cross_validations(),
                },
                "limitSettings": {
                    "timeout": iso_duration(config.experiment_timeout()),
                    "trialTimeout": iso_duration(config.iteration_timeout()),
                    "maxConcurrentTrials": config.max_concurrent_iterations(),
                },
                "featurizationSettings": {
                    "mode": "Auto",
                    "dropColumns": config.training_data().dropped_columns(),
                },
            }
        }
    })
}

pub(crate) fn parse_run(run_id: &RunId, body: &Value) -> ApResult<RunSnapshot> {
    let props = &body["properties"];
    let raw = props["status"].as_str().unwrap_or("NotStarted");
    let status = RunStatus::from_platform(raw).ok_or_else(|| PlatformError::UnexpectedResponse {
        status: 200,
        message: format!("run {} reported unknown status {}", run_id, raw),
    })?;

    let mut snapshot = RunSnapshot::new(
        run_id.clone(),
        props["experimentName"].as_str().unwrap_or_default(),
    );
    snapshot.status = status;
    if status == RunStatus::Failed {
        snapshot.error = Some(format!("job reported status {}", raw));
    }
    Ok(snapshot)
}

fn job_property<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    let props = &body["properties"];
    props["properties"][key]
        .as_str()
        .or_else(|| props["tags"][key].as_str())
}

pub(crate) fn parse_best_run(parent: &RunId, metric: &str, child: &Value) -> (BestRun, ModelHandle) {
    let child_id = RunId::new(child["name"].as_str().unwrap_or_default());
    let algorithm = job_property(child, "run_algorithm").map(str::to_string);
    let best = BestRun {
        run_id: child_id.clone(),
        parent_run_id: parent.clone(),
        iteration: job_property(child, "iteration").and_then(|s| s.parse().ok()),
        pipeline: algorithm.clone(),
        metric: sdk_metric_name(metric),
        score: job_property(child, "score").and_then(|s| s.parse().ok()),
    };
    let model = ModelHandle {
        name: child_id.to_string(),
        run_id: child_id,
        algorithm,
    };
    (best, model)
}

#[async_trait]
impl Platform for AzureMlClient {
    async fn get_workspace(&self, config: &WorkspaceConfig) -> ApResult<Workspace> {
        let body = self
            .get_required(&config.resource_id(), "Workspace", &config.workspace_name)
            .await?;
        Ok(parse_workspace(config, &body))
    }

    async fn get_compute(&self, workspace: &Workspace, name: &str) -> ApResult<Option<ComputeTarget>> {
        let path = format!("{}/computes/{}", workspace.resource_id(), name);
        match self.get_json(&path, "Compute", name).await? {
            Some(body) => Ok(Some(parse_compute(name, &body)?)),
            None => Ok(None),
        }
    }

    async fn create_compute(&self, workspace: &Workspace, spec: &ComputeSpec) -> ApResult<ComputeTarget> {
        let path = format!("{}/computes/{}", workspace.resource_id(), spec.name);
        let (status, text) = self
            .put_json(&path, &compute_body(spec, &workspace.location))
            .await?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, &text, "Compute", &spec.name));
        }

        info!(compute = %spec.name, status, "compute creation accepted");
        match serde_json::from_str::<Value>(&text) {
            Ok(body) if body["properties"].is_object() => parse_compute(&spec.name, &body),
            _ => Ok(ComputeTarget::provisioning(spec)),
        }
    }

    async fn get_dataset(&self, workspace: &Workspace, name: &str) -> ApResult<DatasetRef> {
        let container_path = format!("{}/data/{}", workspace.resource_id(), name);
        let container = self.get_required(&container_path, "Dataset", name).await?;
        let version = container["properties"]["latestVersion"]
            .as_str()
            .ok_or_else(|| PlatformError::NotFound {
                kind: "Dataset version".to_string(),
                name: name.to_string(),
            })?
            .to_string();

        let version_path = format!("{}/versions/{}", container_path, version);
        let body = self.get_required(&version_path, "Dataset", name).await?;
        let id = body["id"].as_str().unwrap_or(&version_path).to_string();
        Ok(DatasetRef::new(id, name, version))
    }

    async fn submit_automl(
        &self,
        workspace: &Workspace,
        experiment: &str,
        config: &AutoMlConfig,
    ) -> ApResult<RunId> {
        let run_id = RunId::new(format!("AutoML_{}", Uuid::new_v4()));
        let path = format!("{}/jobs/{}", workspace.resource_id(), run_id);
        let (status, text) = self
            .put_json(&path, &automl_job_body(workspace, experiment, config))
            .await?;

        match status {
            200..=299 => {
                info!(run_id = %run_id, experiment, "AutoML job submitted");
                Ok(run_id)
            }
            400 | 422 => Err(RunError::SubmissionRejected {
                message: error_message(&text),
            }
            .into()),
            _ => Err(status_error(status, &text, "Job", run_id.as_str())),
        }
    }

    async fn get_run(&self, workspace: &Workspace, run_id: &RunId) -> ApResult<RunSnapshot> {
        let path = format!("{}/jobs/{}", workspace.resource_id(), run_id);
        let body = self.get_required(&path, "Run", run_id.as_str()).await?;
        parse_run(run_id, &body)
    }

    async fn get_best_run(&self, workspace: &Workspace, run_id: &RunId) -> ApResult<(BestRun, ModelHandle)> {
        let path = format!("{}/jobs/{}", workspace.resource_id(), run_id);
        let parent = self.get_required(&path, "Run", run_id.as_str()).await?;
        let child_id = job_property(&parent, BEST_CHILD_PROPERTY).ok_or_else(|| RunError::NoBestRun {
            run_id: run_id.to_string(),
        })?;
        let metric = parent["properties"]["taskDetails"]["primaryMetric"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let child_path = format!("{}/jobs/{}", workspace.resource_id(), child_id);
        let child = self.get_required(&child_path, "Run", child_id).await?;
        Ok(parse_best_run(run_id, &metric, &child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_types::DatasetRef;

    fn workspace() -> Workspace {
        Workspace::from_config(&WorkspaceConfig::new("sub", "rg", "ws"), "eastus")
    }

    #[test]
    fn test_url_includes_api_version() {
        let mut config = AzureMlClientConfig::new("token");
        config.endpoint = "https://example.test/".into();
        let client = AzureMlClient::new(config).unwrap();
        assert_eq!(
            client.url("/subscriptions/sub"),
            format!("https://example.test/subscriptions/sub?api-version={}", API_VERSION)
        );
    }

    #[test]
    fn test_status_codes_map_to_taxonomy() {
        let body = r#"{"error":{"code":"AuthorizationFailed","message":"no access"}}"#;
        assert!(matches!(
            status_error(403, body, "Compute", "cpu"),
            ApError::Platform(PlatformError::AuthenticationFailed { ref message }) if message == "no access"
        ));
        assert!(matches!(
            status_error(404, "", "Compute", "cpu"),
            ApError::Platform(PlatformError::NotFound { .. })
        ));
        assert!(matches!(
            status_error(409, "busy", "Compute", "cpu"),
            ApError::Platform(PlatformError::Conflict { .. })
        ));
        assert!(matches!(
            status_error(503, "down", "Compute", "cpu"),
            ApError::Platform(PlatformError::UnexpectedResponse { status: 503, .. })
        ));
    }

    #[test]
    fn test_parses_cluster() {
        let body = json!({
            "name": "aml-compute-cpu",
            "properties": {
                "computeType": "AmlCompute",
                "provisioningState": "Succeeded",
                "properties": {
                    "vmSize": "STANDARD_D2_V2",
                    "scaleSettings": { "minNodeCount": 0, "maxNodeCount": 4 },
                    "currentNodeCount": 1
                }
            }
        });
        let target = parse_compute("aml-compute-cpu", &body).unwrap();
        assert_eq!(target.kind, ComputeKind::AmlCompute);
        assert_eq!(target.state, ComputeState::Ready);
        assert_eq!((target.min_nodes, target.max_nodes, target.current_nodes), (0, 4, 1));
        assert_eq!(target.vm_size, "STANDARD_D2_V2");
    }

    #[test]
    fn test_parses_failed_provisioning_message() {
        let body = json!({
            "properties": {
                "computeType": "AmlCompute",
                "provisioningState": "Failed",
                "provisioningErrors": [{ "error": { "message": "quota exceeded" } }]
            }
        });
        let target = parse_compute("c", &body).unwrap();
        assert_eq!(target.state, ComputeState::Failed { message: "quota exceeded".into() });
    }

    #[test]
    fn test_rejects_unknown_compute_type() {
        let body = json!({ "properties": { "computeType": "Databricks" } });
        assert!(parse_compute("c", &body).is_err());
    }

    #[test]
    fn test_compute_body_carries_scale_settings() {
        let spec = ComputeSpec::cluster("cpu", "STANDARD_D2_V2", 0, 4);
        let body = compute_body(&spec, "eastus");
        assert_eq!(body["location"], "eastus");
        assert_eq!(body["properties"]["computeType"], "AmlCompute");
        let scale = &body["properties"]["properties"]["scaleSettings"];
        assert_eq!(scale["minNodeCount"], 0);
        assert_eq!(scale["maxNodeCount"], 4);
        assert_eq!(scale["nodeIdleTimeBeforeScaleDown"], "PT2M");
    }

    #[test]
    fn test_job_body_carries_every_setting() {
        let view = DatasetRef::new("id", "COVID19Articles_Train", "2").drop_columns(["title", "doi"]);
        let config = AutoMlConfig::classification("cluster", "aml-compute-cpu", view)
            .with_cross_validations(5)
            .with_experiment_timeout_hours(0.25)
            .with_iteration_timeout_minutes(10)
            .with_max_concurrent_iterations(4);

        let body = automl_job_body(&workspace(), "covid", &config);
        let task = &body["properties"]["taskDetails"];
        assert_eq!(body["properties"]["experimentName"], "covid");
        assert!(body["properties"]["computeId"]
            .as_str()
            .unwrap()
            .ends_with("/workspaces/ws/computes/aml-compute-cpu"));
        assert_eq!(task["primaryMetric"], "AUCWeighted");
        assert_eq!(task["targetColumnName"], "cluster");
        assert_eq!(task["trainingData"]["uri"], "azureml:COVID19Articles_Train:2");
        assert_eq!(task["nCrossValidations"]["value"], 5);
        assert_eq!(task["limitSettings"]["timeout"], "PT15M");
        assert_eq!(task["limitSettings"]["trialTimeout"], "PT10M");
        assert_eq!(task["limitSettings"]["maxConcurrentTrials"], 4);
        assert_eq!(task["featurizationSettings"]["dropColumns"], json!(["title", "doi"]));
    }

    #[test]
    fn test_parses_run_status() {
        let run_id = RunId::new("AutoML_1");
        let body = json!({ "properties": { "status": "Running", "experimentName": "covid" } });
        let snapshot = parse_run(&run_id, &body).unwrap();
        assert_eq!(snapshot.status, RunStatus::Running);
        assert_eq!(snapshot.experiment, "covid");

        let failed = json!({ "properties": { "status": "Failed" } });
        assert!(parse_run(&run_id, &failed).unwrap().error.is_some());

        let odd = json!({ "properties": { "status": "Sleeping" } });
        assert!(parse_run(&run_id, &odd).is_err());
    }

    #[test]
    fn test_parses_best_child() {
        let child = json!({
            "name": "AutoML_1_7",
            "properties": {
                "properties": {
                    "run_algorithm": "VotingEnsemble",
                    "score": "0.9412",
                    "iteration": "7"
                }
            }
        });
        let (best, model) = parse_best_run(&RunId::new("AutoML_1"), "AUCWeighted", &child);
        assert_eq!(best.run_id.as_str(), "AutoML_1_7");
        assert_eq!(best.iteration, Some(7));
        assert_eq!(best.score, Some(0.9412));
        assert_eq!(best.metric, "AUC_weighted");
        assert_eq!(model.algorithm.as_deref(), Some("VotingEnsemble"));
    }

    #[test]
    fn test_best_run_metric_uses_sdk_names() {
        for metric in PrimaryMetric::ALL {
            assert_eq!(sdk_metric_name(job_metric_name(metric)), metric.as_str());
            assert_eq!(sdk_metric_name(metric.as_str()), metric.as_str());
        }
        assert_eq!(sdk_metric_name("SomethingElse"), "SomethingElse");
    }

    #[test]
    fn test_oversized_node_counts_saturate() {
        let body = json!({
            "properties": {
                "computeType": "AmlCompute",
                "provisioningState": "Succeeded",
                "properties": {
                    "scaleSettings": { "minNodeCount": 0, "maxNodeCount": 4_294_967_300u64 },
                    "currentNodeCount": 4_294_967_296u64
                }
            }
        });
        let target = parse_compute("c", &body).unwrap();
        assert_eq!(target.max_nodes, u32::MAX);
        assert_eq!(target.current_nodes, u32::MAX);
        assert_eq!(target.min_nodes, 0);
    }

    #[test]
    fn test_iso_durations() {
        assert_eq!(iso_duration(Duration::from_secs(900)), "PT15M");
        assert_eq!(iso_duration(Duration::from_secs(90)), "PT90S");
    }
}
