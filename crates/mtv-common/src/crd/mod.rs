//! Forklift custom resources used by migration scenarios
//!
//! Only the fields the harness reads or writes are modeled. The controller
//! owns these objects; values here are snapshots fetched on demand.

mod mapping;
mod migration;
mod plan;
mod provider;
mod types;

pub use mapping::{
    MapSource, MapStatus, NetworkDestination, NetworkMap, NetworkMapSpec, NetworkPair,
    OffloadPlugin, StorageDestination, StorageMap, StorageMapSpec, StoragePair,
    VsphereXcopyConfig, NETWORK_TYPE_MULTUS, NETWORK_TYPE_POD,
};
pub use migration::{Migration, MigrationSpec, MigrationStatus, PipelineStep, StepError, VmStatus};
pub use plan::{HookStep, Plan, PlanHookRef, PlanMaps, PlanSpec, PlanStatus, PlanVm};
pub use provider::{
    Hook, HookSpec, Provider, ProviderSpec, ProviderStatus, DEFAULT_HOOK_IMAGE,
};
pub use types::{
    Condition, ObjectRef, ProviderPair, ProviderType, CATEGORY_ADVISORY, CATEGORY_REQUIRED,
};
