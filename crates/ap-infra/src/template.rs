use ap_types::{ApResult, ComputeKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEPLOYMENT_SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#";
pub const PARAMETERS_SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#";
pub const RESOURCE_API_VERSION: &str = "2023-10-01";

/// Machine size of the compute instance. Not a template parameter.
pub const COMPUTE_INSTANCE_VM_SIZE: &str = "Standard_DS3_v2";

/// Inputs of the provisioning template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceTemplateParams {
    pub location: String,
    pub workspace_name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub storage_account_id: String,
    pub key_vault_id: String,
    pub container_registry_id: String,
    pub application_insights_id: String,
    pub compute_instance_name: String,
}

impl Default for WorkspaceTemplateParams {
    fn default() -> Self {
        let rg = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg-automl/providers";
        Self {
            location: "eastus".to_string(),
            workspace_name: "ws-automl".to_string(),
            tags: BTreeMap::new(),
            storage_account_id: format!("{rg}/Microsoft.Storage/storageAccounts/stautoml"),
            key_vault_id: format!("{rg}/Microsoft.KeyVault/vaults/kv-automl"),
            container_registry_id: format!("{rg}/Microsoft.ContainerRegistry/registries/crautoml"),
            application_insights_id: format!("{rg}/Microsoft.Insights/components/appi-automl"),
            compute_instance_name: "ci-automl".to_string(),
        }
    }
}

impl WorkspaceTemplateParams {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ApResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Parameter name and value pairs, in template order.
    fn entries(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("location", json!(self.location)),
            ("workspaceName", json!(self.workspace_name)),
            ("tagValues", json!(self.tags)),
            ("storageAccountId", json!(self.storage_account_id)),
            ("keyVaultId", json!(self.key_vault_id)),
            ("containerRegistryId", json!(self.container_registry_id)),
            ("applicationInsightsId", json!(self.application_insights_id)),
            ("computeInstanceName", json!(self.compute_instance_name)),
        ]
    }
}

fn parameter(name: &str) -> String {
    format!("[parameters('{name}')]")
}

/// Render the deployment template. The supplied values become parameter
/// defaults so the template deploys without a separate parameters file.
pub fn render_template(params: &WorkspaceTemplateParams) -> Value {
    let mut parameters = Map::new();
    for (name, value) in params.entries() {
        let kind = if value.is_object() { "object" } else { "string" };
        parameters.insert(
            name.to_string(),
            json!({ "type": kind, "defaultValue": value }),
        );
    }

    let workspace = json!({
        "type": "Microsoft.MachineLearningServices/workspaces",
        "apiVersion": RESOURCE_API_VERSION,
        "name": parameter("workspaceName"),
        "location": parameter("location"),
        "tags": parameter("tagValues"),
        "identity": { "type": "SystemAssigned" },
        "properties": {
            "friendlyName": parameter("workspaceName"),
            "storageAccount": parameter("storageAccountId"),
            "keyVault": parameter("keyVaultId"),
            "containerRegistry": parameter("containerRegistryId"),
            "applicationInsights": parameter("applicationInsightsId"),
        }
    });

    let compute_instance = json!({
        "type": "Microsoft.MachineLearningServices/workspaces/computes",
        "apiVersion": RESOURCE_API_VERSION,
        "name": "[concat(parameters('workspaceName'), '/', parameters('computeInstanceName'))]",
        "location": parameter("location"),
        "dependsOn": [
            "[resourceId('Microsoft.MachineLearningServices/workspaces', parameters('workspaceName'))]"
        ],
        "properties": {
            "computeType": ComputeKind::ComputeInstance.as_str(),
            "properties": { "vmSize": COMPUTE_INSTANCE_VM_SIZE }
        }
    });

    json!({
        "$schema": DEPLOYMENT_SCHEMA,
        "contentVersion": "1.0.0.0",
        "parameters": parameters,
        "resources": [workspace, compute_instance],
    })
}

/// Render the matching parameters file.
pub fn render_parameters(params: &WorkspaceTemplateParams) -> Value {
    let values: Map<String, Value> = params
        .entries()
        .into_iter()
        .map(|(name, value)| (name.to_string(), json!({ "value": value })))
        .collect();

    json!({
        "$schema": PARAMETERS_SCHEMA,
        "contentVersion": "1.0.0.0",
        "parameters": values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WorkspaceTemplateParams {
        let mut params = WorkspaceTemplateParams::default();
        params.tags.insert("project".into(), "covid-articles".into());
        params
    }

    #[test]
    fn test_declares_workspace_and_compute_instance() {
        let template = render_template(&params());
        let resources = template["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0]["type"], "Microsoft.MachineLearningServices/workspaces");
        assert_eq!(resources[1]["type"], "Microsoft.MachineLearningServices/workspaces/computes");
    }

    #[test]
    fn test_workspace_has_identity_and_linked_resources() {
        let template = render_template(&params());
        let workspace = &template["resources"][0];
        assert_eq!(workspace["identity"]["type"], "SystemAssigned");
        let props = &workspace["properties"];
        for key in ["storageAccount", "keyVault", "containerRegistry", "applicationInsights"] {
            assert!(props[key].as_str().unwrap().starts_with("[parameters('"), "{key}");
        }
    }

    #[test]
    fn test_compute_instance_depends_on_workspace_with_fixed_size() {
        let template = render_template(&params());
        let compute = &template["resources"][1];
        assert_eq!(compute["properties"]["computeType"], "ComputeInstance");
        assert_eq!(compute["properties"]["properties"]["vmSize"], COMPUTE_INSTANCE_VM_SIZE);
        assert_eq!(compute["dependsOn"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_every_parameter_is_declared_with_its_default() {
        let params = params();
        let template = render_template(&params);
        let declared = template["parameters"].as_object().unwrap();
        assert_eq!(declared.len(), 8);
        assert_eq!(declared["tagValues"]["type"], "object");
        assert_eq!(declared["tagValues"]["defaultValue"]["project"], "covid-articles");
        assert_eq!(declared["keyVaultId"]["defaultValue"], params.key_vault_id.as_str());
    }

    #[test]
    fn test_parameters_file_matches_template() {
        let params = params();
        let file = render_parameters(&params);
        assert_eq!(file["$schema"], PARAMETERS_SCHEMA);
        assert_eq!(file["parameters"]["workspaceName"]["value"], "ws-automl");

        let template = render_template(&params);
        let declared: Vec<&String> = template["parameters"].as_object().unwrap().keys().collect();
        let supplied: Vec<&String> = file["parameters"].as_object().unwrap().keys().collect();
        assert_eq!(declared, supplied);
    }
}
