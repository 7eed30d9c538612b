//! Provisioning template for the workspace and its compute instance.
//!
//! Purely declarative: the template is rendered from typed parameters and
//! deployed by the platform's own tooling.

pub mod template;

pub use template::*;
