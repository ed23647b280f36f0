//! Scenario driver
//!
//! [`migrate_vms`] prepares the source VMs, creates maps, hooks and the
//! plan, waits for the run to finish and then either verifies the migrated
//! VMs or, for runs expected to fail, checks where they failed.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use mtv_common::config::HookConfig;
use mtv_common::crd::{
    HookStep, MapSource, NetworkMap, ObjectRef, ProviderPair, ProviderType, StorageMap,
    StoragePair,
};
use mtv_common::{Error, HarnessConfig, Result};
use mtv_migration::copy_offload::{build_copy_offload_secret, storage_vendor};
use mtv_migration::mapping::{
    copy_offload_storage_map_entries, network_map, network_map_entries, offload_plugin,
    storage_map, storage_map_entries,
};
use mtv_migration::submit::hook_resource;
use mtv_migration::{
    await_completion, classify_hook_failure, ensure_run_covers, expected_failure_step,
    run_migration, unique_name, HookRef, MigrationClient, PlanRequest, RunState, SubmitTimeouts, SubmittedRun, VmRef,
};
use mtv_providers::{ForkliftInventory, InventoryApi, PowerState, ProviderAdapter, SnapshotInfo};
use mtv_verify::{verify, IntegrityRunner, VerifyContext, VerifyPlan, VmExpectation};

/// Outcome the scenario expects from the migration run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedResult {
    /// Run must succeed
    #[default]
    Succeed,
    /// Run must fail
    Fail,
}

/// One VM of a scenario
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioVm {
    /// Source VM name
    pub name: String,
    /// Power state to put the source VM in before the run
    pub source_vm_power: Option<PowerState>,
    /// Destination guest agent must come up
    pub guest_agent: bool,
    /// Disks added to the VM on top of its base disk
    pub added_disks: Option<usize>,
}

/// Access and volume mode overrides for copy-offload storage maps
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOffloadOptions {
    /// Access mode override for every mapping entry
    pub access_mode: Option<String>,
    /// Volume mode override for every mapping entry
    pub volume_mode: Option<String>,
}

/// Declarative migration scenario
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationScenario {
    /// Prefix for the generated plan name
    pub name: String,
    /// VMs to migrate
    pub virtual_machines: Vec<ScenarioVm>,
    /// Warm migration
    pub warm_migration: bool,
    /// Pre-copies to wait for before cutover
    pub pre_copies_before_cut_over: Option<u32>,
    /// Seconds from run start to cutover, for warm migrations
    pub cut_over_after_secs: Option<u64>,
    /// Expected outcome
    pub expected_migration_result: ExpectedResult,
    /// Bind the configured pre-hook
    pub pre_hook: bool,
    /// Bind the configured post-hook
    pub post_hook: bool,
    /// Step the failure must be observed at, when it differs from the default
    pub expected_failed_step: Option<HookStep>,
    /// Run post-migration verification for this scenario
    pub check_vms_signals: bool,
    /// Use the vSphere copy-offload storage path
    pub copy_offload: Option<CopyOffloadOptions>,
    /// Preserve static guest IPs
    pub preserve_static_ips: bool,
    /// PVC name template
    pub pvc_name_template: Option<String>,
    /// Treat the PVC name template as generateName
    pub pvc_name_template_use_generate_name: Option<bool>,
}

impl Default for MigrationScenario {
    fn default() -> Self {
        Self {
            name: "mtv-plan".to_string(),
            virtual_machines: Vec::new(),
            warm_migration: false,
            pre_copies_before_cut_over: None,
            cut_over_after_secs: None,
            expected_migration_result: ExpectedResult::Succeed,
            pre_hook: false,
            post_hook: false,
            expected_failed_step: None,
            check_vms_signals: true,
            copy_offload: None,
            preserve_static_ips: false,
            pvc_name_template: None,
            pvc_name_template_use_generate_name: None,
        }
    }
}

impl MigrationScenario {
    /// Parse a scenario from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject scenarios that cannot be driven
    pub fn validate(&self) -> Result<()> {
        if self.virtual_machines.is_empty() {
            return Err(Error::validation_for_field(
                "scenario",
                "virtual_machines",
                "at least one VM is required",
            ));
        }
        if self.virtual_machines.iter().any(|vm| vm.name.is_empty()) {
            return Err(Error::validation_for_field(
                "scenario",
                "virtual_machines.name",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Source VM names in scenario order
    pub fn vm_names(&self) -> Vec<String> {
        self.virtual_machines.iter().map(|vm| vm.name.clone()).collect()
    }

    /// Whether any hook is bound
    pub fn has_hooks(&self) -> bool {
        self.pre_hook || self.post_hook
    }

    fn verify_plan(&self, snapshots_before: &[Option<Vec<SnapshotInfo>>]) -> VerifyPlan {
        VerifyPlan {
            warm: self.warm_migration,
            pre_copies_before_cut_over: self.pre_copies_before_cut_over,
            vms: self
                .virtual_machines
                .iter()
                .zip(snapshots_before.iter().cloned().chain(std::iter::repeat(None)))
                .map(|(vm, before)| VmExpectation {
                    name: vm.name.clone(),
                    source_vm_power: vm.source_vm_power,
                    guest_agent: vm.guest_agent,
                    snapshots_before: before,
                    added_disks: vm.added_disks,
                })
                .collect(),
        }
    }
}

/// Source-side inventory lookups the driver needs
#[async_trait]
pub trait SourceInventory: Send + Sync {
    /// Inventory id of a VM
    async fn vm_id(&self, name: &str) -> Result<String>;

    /// Distinct source networks of `vms`
    async fn network_sources(&self, vms: &[String]) -> Result<Vec<MapSource>>;

    /// Distinct source storages of `vms`
    async fn storage_sources(&self, vms: &[String]) -> Result<Vec<MapSource>>;
}

#[async_trait]
impl<A: InventoryApi> SourceInventory for ForkliftInventory<A> {
    async fn vm_id(&self, name: &str) -> Result<String> {
        ForkliftInventory::<A>::vm_id(self, name).await
    }

    async fn network_sources(&self, vms: &[String]) -> Result<Vec<MapSource>> {
        ForkliftInventory::<A>::network_sources(self, vms).await
    }

    async fn storage_sources(&self, vms: &[String]) -> Result<Vec<MapSource>> {
        ForkliftInventory::<A>::storage_sources(self, vms).await
    }
}

/// Everything a scenario runs against
pub struct ScenarioEnv<'a> {
    /// Harness configuration
    pub config: &'a HarnessConfig,
    /// Provider custom resources the plan references
    pub providers: ProviderPair,
    /// Forklift resource client
    pub client: &'a dyn MigrationClient,
    /// Source inventory
    pub inventory: &'a dyn SourceInventory,
    /// Source provider
    pub source: &'a dyn ProviderAdapter,
    /// Reader for migrated VMs
    pub destination: &'a dyn ProviderAdapter,
    /// Guest data-integrity check
    pub runner: &'a dyn IntegrityRunner,
}

/// What a completed scenario observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioOutcome {
    /// Plan and Migration of the run
    pub run: SubmittedRun,
    /// Terminal state of the run
    pub state: RunState,
    /// Common failed step, for hook failures
    pub failed_step: Option<HookStep>,
    /// Whether post-migration verification ran (and passed)
    pub verified: bool,
}

/// Maps created for a run
struct RunMaps {
    network: NetworkMap,
    storage: StorageMap,
}

/// Drive one scenario end to end
///
/// Both adapters are connected for the duration of the scenario and
/// disconnected on every exit path.
pub async fn migrate_vms(
    env: &ScenarioEnv<'_>,
    scenario: &MigrationScenario,
) -> Result<ScenarioOutcome> {
    scenario.validate()?;

    env.source.connect().await?;
    let result = match env.destination.connect().await {
        Ok(()) => {
            let result = drive(env, scenario).await;
            if let Err(e) = env.destination.disconnect().await {
                warn!(error = %e, "Failed to disconnect destination provider");
            }
            result
        }
        Err(e) => Err(e),
    };
    if let Err(e) = env.source.disconnect().await {
        warn!(error = %e, "Failed to disconnect source provider");
    }
    result
}

async fn drive(env: &ScenarioEnv<'_>, scenario: &MigrationScenario) -> Result<ScenarioOutcome> {
    let config = env.config;
    let names = scenario.vm_names();
    let snapshots_before = prepare_source_vms(env, scenario).await?;

    let mut vms = Vec::with_capacity(names.len());
    for name in &names {
        vms.push(VmRef {
            name: name.clone(),
            id: env.inventory.vm_id(name).await?,
        });
    }

    let plan_name = unique_name(&scenario.name);
    let namespace = config.mtv_namespace.as_str();
    let maps = create_maps(env, scenario, &plan_name, &names).await?;

    let pre_hook = bind_hook(
        env,
        scenario.pre_hook,
        config.hooks.prehook.as_ref(),
        HookStep::PreHook,
    )
    .await?;
    let post_hook = bind_hook(
        env,
        scenario.post_hook,
        config.hooks.posthook.as_ref(),
        HookStep::PostHook,
    )
    .await?;

    let request = PlanRequest {
        name: plan_name.clone(),
        namespace: namespace.to_string(),
        providers: env.providers.clone(),
        network_map: object_ref(&maps.network.metadata, namespace),
        storage_map: object_ref(&maps.storage.metadata, namespace),
        target_namespace: config.target_namespace.clone(),
        vms,
        warm: scenario.warm_migration,
        pre_hook,
        post_hook,
        copy_offload: scenario.copy_offload.is_some(),
        preserve_static_ips: scenario.preserve_static_ips,
        pvc_name_template: scenario.pvc_name_template.clone(),
        pvc_name_template_use_generate_name: scenario.pvc_name_template_use_generate_name,
    };
    let timeouts = SubmitTimeouts {
        ready: config.plan_ready_timeout(),
        plan_secret: config.plan_secret_timeout(),
        interval: config.poll_interval(),
    };
    let cut_over = scenario
        .cut_over_after_secs
        .filter(|_| scenario.warm_migration)
        .and_then(|secs| TimeDelta::try_seconds(i64::try_from(secs).ok()?))
        .map(|delay| Utc::now() + delay);

    let run = run_migration(env.client, &request, timeouts, cut_over).await?;
    let completion = await_completion(
        env.client,
        &run.plan,
        config.plan_wait_timeout(),
        config.poll_interval(),
    )
    .await;

    let checks_enabled = config.check_vms_signals && scenario.check_vms_signals;

    match scenario.expected_migration_result {
        ExpectedResult::Succeed => {
            completion?;
            ensure_run_covers(env.client, &run.plan, &request.vms).await?;
            if checks_enabled {
                verify_migrated(env, scenario, &run.plan, &maps, &snapshots_before).await?;
            }
            Ok(ScenarioOutcome {
                run: run.clone(),
                state: RunState::Succeeded,
                failed_step: None,
                verified: checks_enabled,
            })
        }
        ExpectedResult::Fail => match completion {
            Ok(()) => Err(Error::UnexpectedSuccess {
                plan: run.plan.name.clone(),
            }),
            Err(Error::MigrationFailed { status, .. }) => {
                info!(plan = %run.plan, "Migration failed as expected");
                debug!(plan = %run.plan, %status, "Final plan status");
                ensure_run_covers(env.client, &run.plan, &request.vms).await?;
                if !scenario.has_hooks() {
                    return Ok(ScenarioOutcome {
                        run: run.clone(),
                        state: RunState::Failed,
                        failed_step: None,
                        verified: false,
                    });
                }
                let expected =
                    expected_failure_step(scenario.expected_failed_step, scenario.pre_hook);
                let step =
                    classify_hook_failure(env.client, &run.plan, &names, expected).await?;
                let verified = step == HookStep::PostHook && checks_enabled;
                if verified {
                    verify_migrated(env, scenario, &run.plan, &maps, &snapshots_before).await?;
                }
                Ok(ScenarioOutcome {
                    run: run.clone(),
                    state: RunState::Failed,
                    failed_step: Some(step),
                    verified,
                })
            }
            Err(e) => Err(e),
        },
    }
}

/// Record snapshots and apply the requested power state of every VM
///
/// Snapshot lists are only kept for vSphere sources.
async fn prepare_source_vms(
    env: &ScenarioEnv<'_>,
    scenario: &MigrationScenario,
) -> Result<Vec<Option<Vec<SnapshotInfo>>>> {
    let source_namespace = VerifyContext::from_config(env.config).source_namespace;
    let keep_snapshots = env.source.provider_type() == ProviderType::Vsphere;

    let mut before = Vec::with_capacity(scenario.virtual_machines.len());
    for vm in &scenario.virtual_machines {
        let snapshot = env.source.snapshot(&vm.name, source_namespace.clone()).await?;
        match vm.source_vm_power {
            Some(PowerState::On) => env.source.start(&snapshot.native_handle).await?,
            Some(PowerState::Off) => env.source.stop(&snapshot.native_handle).await?,
            _ => {}
        }
        debug!(
            vm = %vm.name,
            snapshots = snapshot.snapshots_data.len(),
            power = ?vm.source_vm_power,
            "Prepared source VM"
        );
        before.push(keep_snapshots.then_some(snapshot.snapshots_data));
    }
    Ok(before)
}

async fn create_maps(
    env: &ScenarioEnv<'_>,
    scenario: &MigrationScenario,
    plan_name: &str,
    names: &[String],
) -> Result<RunMaps> {
    let config = env.config;
    let namespace = config.mtv_namespace.as_str();

    let network_sources = env.inventory.network_sources(names).await?;
    let network_entries = network_map_entries(
        &network_sources,
        &config.target_namespace,
        &config.multus_network_name,
        config.pod_network_only,
    );
    let network = env
        .client
        .create_network_map(&network_map(
            &format!("{plan_name}-network"),
            namespace,
            env.providers.clone(),
            network_entries,
        ))
        .await?;

    let storage_entries = match &scenario.copy_offload {
        Some(options) => copy_offload_entries(env, options).await?,
        None => storage_map_entries(
            &env.inventory.storage_sources(names).await?,
            &config.storage_class,
        ),
    };
    let storage = env
        .client
        .create_storage_map(&storage_map(
            &format!("{plan_name}-storage"),
            namespace,
            env.providers.clone(),
            storage_entries,
        ))
        .await?;

    Ok(RunMaps { network, storage })
}

async fn copy_offload_entries(
    env: &ScenarioEnv<'_>,
    options: &CopyOffloadOptions,
) -> Result<Vec<StoragePair>> {
    let config = env.config;
    let source = &config.source_provider;
    if source.provider_type != ProviderType::Vsphere {
        return Err(Error::unsupported(source.provider_type.as_str(), "copy-offload"));
    }
    let offload = source.copyoffload.as_ref().ok_or_else(|| {
        Error::validation_for_field(
            "config",
            "source_provider.copyoffload",
            "required for copy-offload scenarios",
        )
    })?;
    let vendor = storage_vendor(offload)?;

    // Not prefixed with the plan name: the controller's plan secret is found by that prefix.
    let secret_name = unique_name("copyoffload-storage");
    let secret = build_copy_offload_secret(offload, &secret_name, &config.mtv_namespace)?;
    env.client.create_secret(&secret).await?;

    let plugin = offload_plugin(&secret_name, vendor);
    copy_offload_storage_map_entries(
        offload.credential("datastore_id").as_deref(),
        offload.credential("secondary_datastore_id").as_deref(),
        &config.storage_class,
        Some(&plugin),
        options.access_mode.as_deref(),
        options.volume_mode.as_deref(),
    )
}

async fn bind_hook(
    env: &ScenarioEnv<'_>,
    wanted: bool,
    hook: Option<&HookConfig>,
    step: HookStep,
) -> Result<HookRef> {
    if !wanted {
        return Ok(HookRef::default());
    }
    let hook = hook.ok_or_else(|| {
        Error::validation_for_field(
            "config",
            format!("hooks.{}", step.as_str().to_ascii_lowercase()),
            "scenario binds a hook that is not configured",
        )
    })?;
    let hook = HookConfig {
        name: unique_name(&hook.name),
        ..hook.clone()
    };
    let namespace = env.config.mtv_namespace.as_str();
    env.client.create_hook(&hook_resource(&hook, namespace)).await?;
    info!(hook = %hook.name, %step, "Created hook");
    Ok(HookRef::new(hook.name, namespace))
}

async fn verify_migrated(
    env: &ScenarioEnv<'_>,
    scenario: &MigrationScenario,
    plan: &ObjectRef,
    maps: &RunMaps,
    snapshots_before: &[Option<Vec<SnapshotInfo>>],
) -> Result<()> {
    let ctx = VerifyContext::from_config(env.config);
    let failures = verify(
        &scenario.verify_plan(snapshots_before),
        env.source,
        env.destination,
        &maps.network,
        &maps.storage,
        &ctx,
        env.runner,
    )
    .await;
    if failures.is_empty() {
        info!(plan = %plan, "Post-migration verification passed");
        return Ok(());
    }
    for failure in &failures {
        error!(plan = %plan, %failure, "Verification failure");
    }
    Err(Error::VerificationFailed {
        plan: plan.name.clone(),
        count: failures.len(),
        details: failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

fn object_ref(meta: &ObjectMeta, namespace: &str) -> ObjectRef {
    ObjectRef::new(
        meta.name.clone().unwrap_or_default(),
        meta.namespace.as_deref().unwrap_or(namespace),
    )
}
