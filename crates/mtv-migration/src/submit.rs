//! Plan submission
//!
//! A plan names its VMs by inventory id so a rename on the source between
//! submission and execution cannot change which VM migrates. Submission is
//! ordered: create the Plan, wait for Ready=True, (copy-offload only) wait
//! for the plan-scoped secret, then create the Migration.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{error, info};

use mtv_common::config::HookConfig;
use mtv_common::crd::{
    Hook, HookSpec, HookStep, Migration, MigrationSpec, ObjectRef, Plan, PlanHookRef, PlanMaps,
    PlanSpec, PlanVm, ProviderPair, DEFAULT_HOOK_IMAGE,
};
use mtv_common::{
    has_condition, poll_until, Error, Result, CONDITION_READY, CREATED_BY_VALUE,
    LABEL_CREATED_BY,
};

use crate::client::MigrationClient;
use crate::copy_offload::await_plan_secret;

/// PVC name template required by the copy-offload volume populator
pub const COPY_OFFLOAD_PVC_NAME_TEMPLATE: &str = "pvc";

/// Optional hook reference; name and namespace must be set together
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HookRef {
    /// Hook resource name
    pub name: Option<String>,
    /// Hook resource namespace
    pub namespace: Option<String>,
}

impl HookRef {
    /// Reference to an existing hook
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
        }
    }

    /// Whether a hook is referenced
    pub fn is_set(&self) -> bool {
        self.name.is_some() || self.namespace.is_some()
    }

    /// Plan binding for `step`, `None` when no hook is referenced
    pub fn binding(&self, step: HookStep) -> Result<Option<PlanHookRef>> {
        match (&self.name, &self.namespace) {
            (Some(name), Some(namespace)) => Ok(Some(PlanHookRef {
                hook: ObjectRef::new(name, namespace),
                step,
            })),
            (None, None) => Ok(None),
            _ => Err(Error::validation_for_field(
                "Plan",
                format!("hooks.{step}"),
                "hook name and namespace must be set together",
            )),
        }
    }
}

/// VM to include in a plan
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmRef {
    /// Source VM name
    pub name: String,
    /// Inventory id
    pub id: String,
}

/// Everything needed to build a Plan
#[derive(Clone, Debug, Default)]
pub struct PlanRequest {
    /// Plan name
    pub name: String,
    /// Plan namespace
    pub namespace: String,
    /// Source and destination providers
    pub providers: ProviderPair,
    /// NetworkMap to apply
    pub network_map: ObjectRef,
    /// StorageMap to apply
    pub storage_map: ObjectRef,
    /// Namespace migrated VMs are created in
    pub target_namespace: String,
    /// VMs to migrate, already resolved to inventory ids
    pub vms: Vec<VmRef>,
    /// Warm migration
    pub warm: bool,
    /// Hook bound to PreHook
    pub pre_hook: HookRef,
    /// Hook bound to PostHook
    pub post_hook: HookRef,
    /// Storage map carries an offload plugin
    pub copy_offload: bool,
    /// Keep static guest IPs
    pub preserve_static_ips: bool,
    /// Explicit PVC name template, ignored for copy-offload
    pub pvc_name_template: Option<String>,
    /// Let Kubernetes append a suffix to templated PVC names
    pub pvc_name_template_use_generate_name: Option<bool>,
}

impl PlanRequest {
    /// Reference to the plan this request creates
    pub fn plan_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.name, &self.namespace)
    }

    /// Build the Plan resource
    pub fn build(&self) -> Result<Plan> {
        if self.vms.is_empty() {
            return Err(Error::validation_for_field(
                "Plan",
                "spec.vms",
                "a plan needs at least one VM",
            ));
        }
        if let Some(vm) = self.vms.iter().find(|vm| vm.id.is_empty()) {
            return Err(Error::validation_for_field(
                "Plan",
                "spec.vms",
                format!("VM {} has no inventory id", vm.name),
            ));
        }

        let hooks: Vec<PlanHookRef> = [
            self.pre_hook.binding(HookStep::PreHook)?,
            self.post_hook.binding(HookStep::PostHook)?,
        ]
        .into_iter()
        .flatten()
        .collect();

        let pvc_name_template = if self.copy_offload {
            Some(COPY_OFFLOAD_PVC_NAME_TEMPLATE.to_string())
        } else {
            self.pvc_name_template.clone()
        };

        Ok(Plan {
            metadata: labelled_metadata(&self.name, &self.namespace),
            spec: PlanSpec {
                provider: self.providers.clone(),
                map: PlanMaps {
                    network: self.network_map.clone(),
                    storage: self.storage_map.clone(),
                },
                target_namespace: self.target_namespace.clone(),
                warm: self.warm,
                vms: self
                    .vms
                    .iter()
                    .map(|vm| PlanVm {
                        id: vm.id.clone(),
                        name: Some(vm.name.clone()),
                        hooks: hooks.clone(),
                    })
                    .collect(),
                preserve_static_ips: self.preserve_static_ips,
                pvc_name_template,
                pvc_name_template_use_generate_name: self.pvc_name_template_use_generate_name,
            },
            status: None,
        })
    }
}

fn labelled_metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            LABEL_CREATED_BY.to_string(),
            CREATED_BY_VALUE.to_string(),
        )])),
        ..Default::default()
    }
}

/// Hook resource for a configured hook definition
pub fn hook_resource(config: &HookConfig, namespace: &str) -> Hook {
    Hook {
        metadata: labelled_metadata(&config.name, namespace),
        spec: HookSpec {
            image: config
                .image
                .clone()
                .unwrap_or_else(|| DEFAULT_HOOK_IMAGE.to_string()),
            playbook: (!config.payload.is_empty()).then(|| config.payload.clone()),
            service_account: None,
            deadline: None,
        },
    }
}

/// Deadlines for the submission waits
#[derive(Clone, Copy, Debug)]
pub struct SubmitTimeouts {
    /// Plan admission deadline
    pub ready: Duration,
    /// Plan-scoped copy-offload secret deadline
    pub plan_secret: Duration,
    /// Interval between samples
    pub interval: Duration,
}

/// Plan and Migration created for one run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedRun {
    /// The admitted plan
    pub plan: ObjectRef,
    /// The Migration executing it
    pub migration: ObjectRef,
}

/// Create the Plan described by `request`
pub async fn submit_plan<C>(client: &C, request: &PlanRequest) -> Result<ObjectRef>
where
    C: MigrationClient + ?Sized,
{
    let plan = request.build()?;
    info!(
        plan = %request.plan_ref(),
        vms = request.vms.len(),
        warm = request.warm,
        copy_offload = request.copy_offload,
        "Creating plan"
    );
    client.create_plan(&plan).await?;
    Ok(request.plan_ref())
}

/// Wait for the plan to report Ready=True
///
/// On timeout the plan and both providers are logged before returning
/// [`Error::PlanNotReady`].
pub async fn await_ready<C>(
    client: &C,
    plan: &ObjectRef,
    providers: &ProviderPair,
    timeout: Duration,
    interval: Duration,
) -> Result<()>
where
    C: MigrationClient + ?Sized,
{
    let (name, namespace) = (plan.name.as_str(), plan.namespace.as_str());
    let result = poll_until(
        timeout,
        interval,
        format!("plan {plan} to become ready"),
        || async move {
            Ok(client
                .get_plan(name, namespace)
                .await?
                .is_some_and(|p| has_condition(Some(p.conditions()), CONDITION_READY)))
        },
    )
    .await;

    match result {
        Ok(()) => {
            info!(plan = %plan, "Plan is ready");
            Ok(())
        }
        Err(Error::Timeout { .. }) => {
            log_not_ready(client, plan, providers).await;
            Err(Error::PlanNotReady {
                plan: plan.name.clone(),
                namespace: plan.namespace.clone(),
                timeout_secs: timeout.as_secs(),
            })
        }
        Err(e) => Err(e),
    }
}

async fn log_not_ready<C>(client: &C, plan: &ObjectRef, providers: &ProviderPair)
where
    C: MigrationClient + ?Sized,
{
    let plan_obj = client.get_plan(&plan.name, &plan.namespace).await;
    error!(plan = %plan, state = ?plan_obj.ok().flatten().and_then(|p| p.status), "Plan not ready");
    for (role, provider) in [("source", &providers.source), ("destination", &providers.destination)] {
        match client.get_provider(&provider.name, &provider.namespace).await {
            Ok(obj) => error!(
                role,
                provider = %provider,
                status = ?obj.and_then(|p| p.status),
                "Provider state"
            ),
            Err(e) => error!(role, provider = %provider, error = %e, "Failed to read provider"),
        }
    }
}

/// Create the Migration executing `plan`
///
/// `cut_over` is only meaningful for warm migrations. The Migration name is
/// generated by the API server from the plan name.
pub async fn start_migration<C>(
    client: &C,
    plan: &ObjectRef,
    cut_over: Option<DateTime<Utc>>,
) -> Result<ObjectRef>
where
    C: MigrationClient + ?Sized,
{
    let mut metadata = labelled_metadata("", &plan.namespace);
    metadata.name = None;
    metadata.generate_name = Some(format!("{}-", plan.name));

    let migration = Migration {
        metadata,
        spec: MigrationSpec {
            plan: plan.clone(),
            cutover: cut_over.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        },
        status: None,
    };
    let created = client.create_migration(&migration).await?;
    let name = created.metadata.name.ok_or_else(|| {
        Error::internal_with_context("start_migration", "created Migration has no name")
    })?;
    info!(plan = %plan, migration = %name, cut_over = ?migration.spec.cutover, "Migration started");
    Ok(ObjectRef::new(name, &plan.namespace))
}

/// Submit, admit and start a plan
pub async fn run_migration<C>(
    client: &C,
    request: &PlanRequest,
    timeouts: SubmitTimeouts,
    cut_over: Option<DateTime<Utc>>,
) -> Result<SubmittedRun>
where
    C: MigrationClient + ?Sized,
{
    let plan = submit_plan(client, request).await?;
    await_ready(
        client,
        &plan,
        &request.providers,
        timeouts.ready,
        timeouts.interval,
    )
    .await?;
    if request.copy_offload {
        await_plan_secret(client, &plan, timeouts.plan_secret, timeouts.interval).await?;
    }
    let migration = start_migration(client, &plan, cut_over).await?;
    Ok(SubmittedRun { plan, migration })
}
