//! Migration stories run against a live cluster
//!
//! - `cold_migration`: a powered-off VM migrated cold and verified
//! - `warm_migration`: a running VM migrated with pre-copies and a cut-over
//! - `hook_failures`: plans whose hooks fail at the expected step

mod cold_migration;
mod helpers;
mod hook_failures;
mod warm_migration;
