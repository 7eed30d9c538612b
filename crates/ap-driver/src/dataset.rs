//! Training-data view builder.

use ap_platform::Platform;
use ap_types::{ApResult, DatasetView, Workspace};
use tracing::info;

/// Fetch the latest version of `dataset_name` and drop `exclude` from it.
///
/// Column names are not checked here; unknown names are reported by the
/// platform when the job is submitted.
pub async fn build_training_view(
    platform: &dyn Platform,
    workspace: &Workspace,
    dataset_name: &str,
    exclude: &[String],
) -> ApResult<DatasetView> {
    let dataset = platform.get_dataset(workspace, dataset_name).await?;
    let view = dataset.drop_columns(exclude.iter().cloned());

    info!(
        dataset = %dataset.name,
        version = %dataset.version,
        dropped = view.dropped_columns().len(),
        retained = ?view.retained_columns().map(|c| c.len()),
        "training view ready"
    );
    Ok(view)
}
