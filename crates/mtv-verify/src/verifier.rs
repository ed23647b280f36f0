//! Per-VM verification pass
//!
//! Reads both sides of every planned VM fresh and runs the checks in a
//! fixed order. Errors from reads or guest commands become failures of the check
//! that needed them; nothing here aborts the pass.

use std::time::Duration;

use tracing::{debug, info, warn};

use mtv_common::crd::{NetworkMap, ProviderType, StorageMap};
use mtv_common::HarnessConfig;
use mtv_providers::{PowerState, ProviderAdapter, SnapshotInfo, VmSnapshot};

use crate::checks::{
    check_cpu, check_disk_count, check_guest_agent, check_integrity_output, check_memory,
    check_migration_network, check_network, check_power, check_snapshots, check_storage,
    Findings,
};
use crate::integrity::IntegrityRunner;
use crate::{AssertionFailure, Check};

/// How long to wait for the destination guest agent to report
pub const DEFAULT_GUEST_AGENT_TIMEOUT: Duration = Duration::from_secs(300);

/// What the scenario expects of one migrated VM
#[derive(Clone, Debug, Default)]
pub struct VmExpectation {
    /// VM name on both sides
    pub name: String,
    /// Power state the source was put in before the run; the destination must match
    pub source_vm_power: Option<PowerState>,
    /// Destination guest agent must come up
    pub guest_agent: bool,
    /// Source snapshots recorded before submission
    pub snapshots_before: Option<Vec<SnapshotInfo>>,
    /// Disks added on top of the base disk, when the scenario adds any
    pub added_disks: Option<usize>,
}

/// Plan-level inputs of the pass
#[derive(Clone, Debug, Default)]
pub struct VerifyPlan {
    /// Warm migration
    pub warm: bool,
    /// Pre-copies taken before cutover
    pub pre_copies_before_cut_over: Option<u32>,
    /// VMs to verify, in order
    pub vms: Vec<VmExpectation>,
}

impl VerifyPlan {
    /// Minimum counter entries when the integrity check applies
    pub fn integrity_min_entries(&self) -> Option<usize> {
        match self.pre_copies_before_cut_over {
            Some(n) if self.warm && n > 0 => Some(n as usize),
            _ => None,
        }
    }
}

/// Environment of the pass
#[derive(Clone, Debug)]
pub struct VerifyContext {
    /// Storage class every destination disk must use
    pub storage_class: String,
    /// Namespace of the migrated VMs
    pub target_namespace: String,
    /// Namespace of the source VMs, for OpenShift sources
    pub source_namespace: Option<String>,
    /// Guest agent wait
    pub guest_agent_timeout: Duration,
    /// Poll interval for the guest agent wait
    pub poll_interval: Duration,
    /// Linux guest login
    pub linux_credentials: Option<(String, String)>,
    /// Windows guest login
    pub windows_credentials: Option<(String, String)>,
    /// Source host address on the migration network, when one is configured
    pub migration_host_ip: Option<String>,
}

impl VerifyContext {
    /// Context from the harness configuration
    pub fn from_config(config: &HarnessConfig) -> Self {
        let src = &config.source_provider;
        Self {
            storage_class: config.storage_class.clone(),
            target_namespace: config.target_namespace.clone(),
            source_namespace: src
                .project_name
                .clone()
                .or_else(|| Some(config.target_namespace.clone())),
            guest_agent_timeout: DEFAULT_GUEST_AGENT_TIMEOUT,
            poll_interval: config.poll_interval(),
            linux_credentials: src.guest_credentials(false),
            windows_credentials: src.guest_credentials(true),
            migration_host_ip: src.migration_host_ip().map(str::to_string),
        }
    }

    fn guest_credentials(&self, win_os: bool) -> Option<&(String, String)> {
        if win_os {
            self.windows_credentials.as_ref()
        } else {
            self.linux_credentials.as_ref()
        }
    }
}

/// Verify every VM of `plan`
///
/// Returns all failures across all VMs; an empty list means the migration
/// preserved everything checked.
#[allow(clippy::too_many_arguments)]
pub async fn verify<S, D, R>(
    plan: &VerifyPlan,
    source: &S,
    dest: &D,
    network_map: &NetworkMap,
    storage_map: &StorageMap,
    ctx: &VerifyContext,
    runner: &R,
) -> Vec<AssertionFailure>
where
    S: ProviderAdapter + ?Sized,
    D: ProviderAdapter + ?Sized,
    R: IntegrityRunner + ?Sized,
{
    let mut failures = Vec::new();
    for vm in &plan.vms {
        let findings = verify_vm(plan, vm, source, dest, network_map, storage_map, ctx, runner).await;
        info!(vm = %vm.name, failures = findings.failures().len(), "Verified VM");
        failures.extend(findings.into_failures());
    }
    failures
}

/// Destination disk count against the disks the scenario added
pub fn verify_vm_disk_count(
    vm: &VmExpectation,
    dest: &VmSnapshot,
) -> Vec<AssertionFailure> {
    let mut f = Findings::new(&vm.name);
    check_disk_count(&mut f, vm.added_disks.unwrap_or(0), dest);
    f.into_failures()
}

#[allow(clippy::too_many_arguments)]
async fn verify_vm<S, D, R>(
    plan: &VerifyPlan,
    vm: &VmExpectation,
    source: &S,
    dest: &D,
    network_map: &NetworkMap,
    storage_map: &StorageMap,
    ctx: &VerifyContext,
    runner: &R,
) -> Findings
where
    S: ProviderAdapter + ?Sized,
    D: ProviderAdapter + ?Sized,
    R: IntegrityRunner + ?Sized,
{
    let mut f = Findings::new(&vm.name);

    let source_vm = match source.snapshot(&vm.name, ctx.source_namespace.clone()).await {
        Ok(s) => s,
        Err(e) => {
            f.fail(Check::Read, "source VM", e, "read source VM");
            return f;
        }
    };
    let dest_read = if vm.guest_agent {
        wait_for_guest_agent(dest, &vm.name, ctx).await
    } else {
        dest.snapshot(&vm.name, Some(ctx.target_namespace.clone())).await
    };
    let dest_vm = match dest_read {
        Ok(d) => d,
        Err(e) => {
            f.fail(Check::Read, "destination VM", e, "read destination VM");
            return f;
        }
    };

    check_power(&mut f, &source_vm, &dest_vm, vm.source_vm_power);
    check_cpu(&mut f, &source_vm, &dest_vm);
    check_memory(&mut f, &source_vm, &dest_vm);
    check_network(&mut f, &network_map.spec.map, &source_vm, &dest_vm);
    check_storage(&mut f, &storage_map.spec.map, &ctx.storage_class, &source_vm, &dest_vm);
    if let Some(ip) = &ctx.migration_host_ip {
        check_migration_network(&mut f, ip, &dest_vm);
    }

    if let Some(before) = &vm.snapshots_before {
        if plan.integrity_min_entries().is_some() {
            check_snapshots(&mut f, before, &source_vm.snapshots_data);
        }
    }

    if vm.guest_agent {
        check_guest_agent(&mut f, &dest_vm);
    }

    if let Some(min) = plan.integrity_min_entries() {
        run_integrity(&mut f, &source_vm, &dest_vm, min, ctx, runner).await;
    }

    if source.provider_type() == ProviderType::Ovirt {
        match source.power_off_event_recorded(&source_vm.native_handle).await {
            Ok(false) => {}
            Ok(true) => f.fail(
                Check::PowerOffEvent,
                "no user power-off",
                "user power-off recorded",
                "source VM power-off event",
            ),
            Err(e) => f.fail(Check::PowerOffEvent, "event log", e, "read source VM events"),
        }
    }

    if let Some(added) = vm.added_disks {
        check_disk_count(&mut f, added, &dest_vm);
    }

    f
}

async fn run_integrity<R>(
    f: &mut Findings,
    source_vm: &VmSnapshot,
    dest_vm: &VmSnapshot,
    min_entries: usize,
    ctx: &VerifyContext,
    runner: &R,
) where
    R: IntegrityRunner + ?Sized,
{
    let Some(ip) = dest_vm.guest_ip() else {
        f.fail(Check::DataIntegrity, "guest IP", "none", "destination guest IP");
        return;
    };
    let Some((username, password)) = ctx.guest_credentials(source_vm.win_os) else {
        f.fail(
            Check::DataIntegrity,
            "guest credentials",
            "none",
            "guest login for integrity check",
        );
        return;
    };
    match runner.read_counter(ip, username, password).await {
        Ok(output) => check_integrity_output(f, &output, min_entries),
        Err(e) => f.fail(Check::DataIntegrity, "counter output", e, "read guest counter"),
    }
}

/// Read the destination VM until its guest agent reports or time runs out
///
/// The last read is returned either way so the guest agent check can
/// record the failure.
async fn wait_for_guest_agent<D>(dest: &D, name: &str, ctx: &VerifyContext) -> mtv_common::Result<VmSnapshot>
where
    D: ProviderAdapter + ?Sized,
{
    let start = tokio::time::Instant::now();
    loop {
        let read = dest.snapshot(name, Some(ctx.target_namespace.clone())).await;
        match &read {
            Ok(vm) if vm.guest_agent_running => return read,
            Ok(_) => debug!(vm = %name, "Guest agent not running yet"),
            Err(e) => debug!(vm = %name, error = %e, "Destination read failed, retrying"),
        }
        if start.elapsed() >= ctx.guest_agent_timeout {
            warn!(vm = %name, timeout_secs = ctx.guest_agent_timeout.as_secs(), "Guest agent did not come up");
            return read;
        }
        tokio::time::sleep(ctx.poll_interval).await;
    }
}
