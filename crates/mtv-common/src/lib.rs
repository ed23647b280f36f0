//! Common types for VM migration scenarios
//!
//! Forklift custom resources, the error taxonomy, polling helpers, harness
//! configuration and logging setup shared by every scenario crate.

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use config::HarnessConfig;
pub use error::{Error, Result};
pub use kube_utils::{has_condition, poll_until, HasConditionFields, CONDITION_READY, STATUS_TRUE};
pub use retry::{retry_transient, RetryConfig};

/// Label applied to every resource a scenario creates
pub const LABEL_CREATED_BY: &str = "mtv-e2e/created-by";
/// Value of [`LABEL_CREATED_BY`]
pub const CREATED_BY_VALUE: &str = "mtv-e2e";
