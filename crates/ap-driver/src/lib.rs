//! AutoML job driver.
//!
//! Resolves a workspace, reconciles a compute cluster, builds the training
//! view, submits one AutoML classification job and waits for its best run.

pub mod dataset;
pub mod driver;
pub mod plan;
pub mod progress;
pub mod resolver;
pub mod submit;
pub mod wait;

pub use dataset::build_training_view;
pub use driver::{demo_sandbox, Driver, DriverOutcome};
pub use plan::{RunPlan, EXCLUDED_COLUMNS};
pub use progress::{format_duration, spawn_printer, ProgressPrinter};
pub use resolver::{reconcile_compute, wait_for_compute, ReconcileAction, Reconciled, DEFAULT_PROVISIONING_TIMEOUT};
pub use submit::{Experiment, SubmittedRun};
pub use wait::{CancelToken, WaitOptions};
