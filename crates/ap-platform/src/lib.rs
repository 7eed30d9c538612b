//! # ap-platform
//!
//! The seam between the driver and the managed ML platform.
//!
//! Provides the [`Platform`] trait, an in-process [`SandboxPlatform`] that
//! honours the platform's observable contract without any remote calls, and
//! [`AzureMlClient`], a REST implementation against the management API.

mod platform;
mod rest;
mod sandbox;

pub use platform::Platform;
pub use rest::{AzureMlClient, AzureMlClientConfig, API_VERSION, DEFAULT_ENDPOINT};
pub use sandbox::{SandboxConfig, SandboxPlatform, Submission};
