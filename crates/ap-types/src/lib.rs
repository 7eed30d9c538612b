pub mod automl;
pub mod compute;
pub mod dataset;
pub mod errors;
pub mod run;
pub mod workspace;

pub use automl::*;
pub use compute::*;
pub use dataset::*;
pub use errors::*;
pub use run::*;
pub use workspace::*;
