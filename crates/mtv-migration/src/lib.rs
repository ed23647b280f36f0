//! Migration plan lifecycle
//!
//! Builds network/storage maps, submits a Plan and its Migration, polls the
//! run to a terminal state and, for runs expected to fail at a hook, works
//! out which pipeline step each VM stopped at.

#![deny(missing_docs)]

pub mod classifier;
pub mod client;
pub mod copy_offload;
pub mod mapping;
pub mod poller;
pub mod submit;

pub use classifier::{
    classify_hook_failure, ensure_run_covers, expected_failure_step, find_migration,
};
pub use client::{KubeMigrationClient, MigrationClient};
pub use poller::{await_completion, classify, RunState};
pub use submit::{
    run_migration, HookRef, PlanRequest, SubmitTimeouts, SubmittedRun, VmRef,
};

use uuid::Uuid;

/// `prefix` plus a short random suffix, valid as a Kubernetes name
pub fn unique_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!("{}-{}", prefix.trim_end_matches('-'), &suffix[..8]);
    name.to_ascii_lowercase()
}
