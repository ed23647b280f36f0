//! End-to-end VM migration scenarios
//!
//! Drives Forklift migrations from a declarative [`MigrationScenario`]:
//! the source VMs are prepared, maps and a plan are submitted, the run is
//! polled to a terminal state and the outcome is checked against what the
//! scenario expects.
//!
//! # Crates
//!
//! - [`mtv_common`] - errors, custom resources, configuration, polling
//! - [`mtv_providers`] - source provider adapters and the inventory client
//! - [`mtv_migration`] - plan submission, polling and failure classification
//! - [`mtv_verify`] - post-migration checks

#![deny(missing_docs)]

pub mod scenario;

pub use scenario::{
    migrate_vms, CopyOffloadOptions, ExpectedResult, MigrationScenario, ScenarioEnv,
    ScenarioOutcome, ScenarioVm, SourceInventory,
};

use std::path::Path;
use std::time::Duration;

use mtv_common::crd::ProviderPair;
use mtv_common::kube_utils::create_client;
use mtv_common::{HarnessConfig, Result};
use mtv_migration::KubeMigrationClient;
use mtv_providers::{destination_adapter, inventory_client, source_adapter, ForkliftInventory};
use mtv_verify::PodIntegrityRunner;

/// Deadline for the data-integrity runner pod to finish
pub const INTEGRITY_POD_TIMEOUT: Duration = Duration::from_secs(120);

/// Run a scenario against the cluster and providers in `config`
///
/// `providers` names the Provider resources the plan references; the
/// source one is also resolved in the inventory.
pub async fn run_scenario(
    config: &HarnessConfig,
    scenario: &MigrationScenario,
    providers: ProviderPair,
) -> Result<ScenarioOutcome> {
    let kubeconfig = config.resolve_kubeconfig();
    let client = create_client(kubeconfig.as_deref().map(Path::new)).await?;

    let migration_client = KubeMigrationClient::new(client.clone());
    let inventory =
        ForkliftInventory::connect(inventory_client(config)?, &providers.source.name).await?;
    let source = source_adapter(config, client.clone(), &providers.source.name).await?;
    let destination = destination_adapter(config, client.clone());
    let runner = PodIntegrityRunner::new(
        client,
        &config.target_namespace,
        &config.runner_image,
        INTEGRITY_POD_TIMEOUT,
        config.poll_interval(),
    );

    let env = ScenarioEnv {
        config,
        providers,
        client: &migration_client,
        inventory: &inventory,
        source: source.as_ref(),
        destination: &destination,
        runner: &runner,
    };
    migrate_vms(&env, scenario).await
}
