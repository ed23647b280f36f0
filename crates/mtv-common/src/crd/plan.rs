//! Forklift Plan custom resource
//!
//! A Plan names the VMs to migrate, the providers on both sides and the
//! network/storage maps to apply. The controller admits it by setting
//! `Ready=True`; execution is then tracked on the Plan's conditions and in
//! a separate Migration resource.

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ObjectRef, ProviderPair};

/// Plan pipeline step a hook is bound to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum HookStep {
    /// Runs before disk transfer
    PreHook,
    /// Runs after the VM is created on the target
    PostHook,
}

impl HookStep {
    /// Pipeline step name the controller reports for this hook
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreHook => "PreHook",
            Self::PostHook => "PostHook",
        }
    }
}

impl fmt::Display for HookStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook binding on a plan VM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanHookRef {
    /// Hook resource
    pub hook: ObjectRef,
    /// Step the hook runs at
    pub step: HookStep,
}

/// VM entry in a plan
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanVm {
    /// Inventory id of the VM
    pub id: String,

    /// VM name, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Hooks bound to this VM
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<PlanHookRef>,
}

/// Network and storage maps used by a plan
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanMaps {
    /// NetworkMap reference
    pub network: ObjectRef,
    /// StorageMap reference
    pub storage: ObjectRef,
}

/// Plan spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "Plan",
    namespaced,
    status = "PlanStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    /// Source and destination providers
    pub provider: ProviderPair,

    /// Maps applied to every VM
    pub map: PlanMaps,

    /// Namespace migrated VMs are created in
    pub target_namespace: String,

    /// Warm (pre-copy) migration
    #[serde(default)]
    pub warm: bool,

    /// VMs to migrate
    pub vms: Vec<PlanVm>,

    /// Keep static guest IPs on the target
    #[serde(
        rename = "preserveStaticIPs",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub preserve_static_ips: bool,

    /// Template for target PVC names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_name_template: Option<String>,

    /// Let Kubernetes append a random suffix to templated PVC names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_name_template_use_generate_name: Option<bool>,
}

/// Plan status as written by the controller
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    /// Plan conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Migration history, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub migration: Option<serde_json::Value>,
}

impl Plan {
    /// Conditions on the plan, empty when no status is present yet
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn plan_serializes_hooks_and_vm_ids() {
        let plan = Plan::new(
            "mtv-plan",
            PlanSpec {
                provider: ProviderPair {
                    source: ObjectRef::new("vsphere", "openshift-mtv"),
                    destination: ObjectRef::new("host", "openshift-mtv"),
                },
                map: PlanMaps {
                    network: ObjectRef::new("net", "mtv-tests"),
                    storage: ObjectRef::new("store", "mtv-tests"),
                },
                target_namespace: "mtv-tests".to_string(),
                warm: true,
                vms: vec![PlanVm {
                    id: "vm-42".to_string(),
                    name: Some("rhel9".to_string()),
                    hooks: vec![PlanHookRef {
                        hook: ObjectRef::new("posthook", "openshift-mtv"),
                        step: HookStep::PostHook,
                    }],
                }],
                ..Default::default()
            },
        );

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["apiVersion"], "forklift.konveyor.io/v1beta1");
        assert_eq!(json["spec"]["targetNamespace"], "mtv-tests");
        assert_eq!(json["spec"]["vms"][0]["id"], "vm-42");
        assert_eq!(json["spec"]["vms"][0]["hooks"][0]["step"], "PostHook");
        assert_eq!(json["spec"]["vms"][0]["hooks"][0]["hook"]["name"], "posthook");
        assert!(json["spec"].get("pvcNameTemplate").is_none());
        assert!(json["spec"].get("preserveStaticIPs").is_none());
        assert_eq!(Plan::kind(&()), "Plan");
    }

    #[test]
    fn conditions_empty_without_status() {
        let plan = Plan::new("p", PlanSpec::default());
        assert!(plan.conditions().is_empty());
    }
}
