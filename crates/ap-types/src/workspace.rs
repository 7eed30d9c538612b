//! Workspace configuration file and the workspace handle returned by the
//! platform.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::ApResult;
use crate::config_error;

/// File name the platform tooling writes next to a project.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Hidden directory that may hold [`CONFIG_FILE_NAME`] instead of the
/// project root.
pub const CONFIG_DIR_NAME: &str = ".azureml";

/// Contents of the local workspace configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace_name: String,
}

impl WorkspaceConfig {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        workspace_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            workspace_name: workspace_name.into(),
        }
    }

    /// Read and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ApResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Search `start` and each of its ancestors for a configuration file,
    /// checking `config.json` before `.azureml/config.json` at every level.
    ///
    /// Returns the path that was loaded together with its contents.
    pub fn discover<P: AsRef<Path>>(start: P) -> ApResult<(PathBuf, Self)> {
        for dir in start.as_ref().ancestors() {
            let candidates = [
                dir.join(CONFIG_FILE_NAME),
                dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
            ];
            for candidate in candidates {
                if candidate.is_file() {
                    let config = Self::from_file(&candidate)?;
                    return Ok((candidate, config));
                }
            }
        }

        Err(config_error!(
            "no {} found in {} or any parent directory",
            CONFIG_FILE_NAME,
            start.as_ref().display()
        ))
    }

    pub fn validate(&self) -> ApResult<()> {
        let fields = [
            ("subscription_id", &self.subscription_id),
            ("resource_group", &self.resource_group),
            ("workspace_name", &self.workspace_name),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(config_error!("workspace config field '{}' is empty", field));
            }
        }
        Ok(())
    }

    /// Fully-qualified resource id of the workspace.
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
            self.subscription_id, self.resource_group, self.workspace_name
        )
    }
}

/// Handle to an existing workspace. Owned and lifecycle-managed by the
/// platform; this code only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
}

impl Workspace {
    pub fn from_config(config: &WorkspaceConfig, location: impl Into<String>) -> Self {
        Self {
            name: config.workspace_name.clone(),
            subscription_id: config.subscription_id.clone(),
            resource_group: config.resource_group.clone(),
            location: location.into(),
        }
    }

    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
            self.subscription_id, self.resource_group, self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(path: &Path, workspace: &str) {
        let body = serde_json::json!({
            "subscription_id": "00000000-0000-0000-0000-000000000001",
            "resource_group": "rg-automl",
            "workspace_name": workspace,
        });
        fs::write(path, body.to_string()).unwrap();
    }

    #[test]
    fn test_from_file_reads_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        write_config(&path, "ws-covid");

        let config = WorkspaceConfig::from_file(&path).unwrap();
        assert_eq!(config.workspace_name, "ws-covid");
        assert_eq!(config.resource_group, "rg-automl");
    }

    #[test]
    fn test_discover_walks_up_to_parent() {
        let dir = tempfile::tempdir().unwrap();
        write_config(&dir.path().join(CONFIG_FILE_NAME), "ws-parent");
        let nested = dir.path().join("notebooks").join("covid");
        fs::create_dir_all(&nested).unwrap();

        let (found, config) = WorkspaceConfig::discover(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));
        assert_eq!(config.workspace_name, "ws-parent");
    }

    #[test]
    fn test_discover_checks_hidden_directory() {
        let dir = tempfile::tempdir().unwrap();
        let hidden = dir.path().join(CONFIG_DIR_NAME);
        fs::create_dir_all(&hidden).unwrap();
        write_config(&hidden.join(CONFIG_FILE_NAME), "ws-hidden");

        let (_, config) = WorkspaceConfig::discover(dir.path()).unwrap();
        assert_eq!(config.workspace_name, "ws-hidden");
    }

    #[test]
    fn test_empty_field_is_rejected() {
        let config = WorkspaceConfig::new("sub", " ", "ws");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("resource_group"));
    }

    #[test]
    fn test_resource_id_matches_handle() {
        let config = WorkspaceConfig::new("sub", "rg", "ws");
        let workspace = Workspace::from_config(&config, "eastus");
        assert_eq!(config.resource_id(), workspace.resource_id());
        assert!(workspace.resource_id().ends_with("/workspaces/ws"));
    }
}
