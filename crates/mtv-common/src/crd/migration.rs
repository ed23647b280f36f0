//! Forklift Migration custom resource
//!
//! A Migration starts execution of an admitted Plan. Its status carries the
//! per-VM pipeline used to work out where a failed migration stopped.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ObjectRef};

/// Migration spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "Migration",
    namespaced,
    status = "MigrationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    /// Plan this migration executes
    pub plan: ObjectRef,

    /// Cutover time for warm migrations (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutover: Option<String>,
}

/// Migration status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    /// Migration conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Per-VM execution status
    #[serde(default)]
    pub vms: Vec<VmStatus>,
}

/// Execution status of one VM
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmStatus {
    /// Inventory id
    #[serde(default)]
    pub id: String,

    /// VM name
    #[serde(default)]
    pub name: String,

    /// Current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Ordered pipeline steps
    #[serde(default)]
    pub pipeline: Vec<PipelineStep>,
}

impl VmStatus {
    /// True when `key` is this VM's id or name
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name == key
    }

    /// First pipeline step that carries an error
    pub fn failed_step(&self) -> Option<&PipelineStep> {
        self.pipeline.iter().find(|s| s.has_error())
    }
}

/// One step of a VM's migration pipeline
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    /// Step name (e.g., PreHook, DiskTransfer, ImageConversion, PostHook)
    pub name: String,

    /// Step phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Error reported for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl PipelineStep {
    /// True when the step carries a non-empty error
    pub fn has_error(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.is_empty())
    }
}

/// Error attached to a pipeline step
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    /// Phase the step was in when it failed
    #[serde(default)]
    pub phase: String,

    /// Failure reasons
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl StepError {
    /// True when neither a phase nor any reason is recorded
    pub fn is_empty(&self) -> bool {
        self.phase.is_empty() && self.reasons.is_empty()
    }
}

impl Migration {
    /// True when this migration executes the given plan
    pub fn is_for_plan(&self, plan: &str, namespace: &str) -> bool {
        self.spec.plan.name == plan && self.spec.plan.namespace == namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_status(json: serde_json::Value) -> VmStatus {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn failed_step_is_first_step_with_error() {
        let vm = vm_status(serde_json::json!({
            "id": "vm-1",
            "name": "rhel9",
            "pipeline": [
                {"name": "Initialize", "phase": "Completed"},
                {"name": "DiskTransfer", "error": {"phase": "Running", "reasons": ["boom"]}},
                {"name": "PostHook", "error": {"phase": "Running", "reasons": ["later"]}}
            ]
        }));
        assert_eq!(vm.failed_step().map(|s| s.name.as_str()), Some("DiskTransfer"));
    }

    #[test]
    fn empty_error_object_is_not_a_failure() {
        let vm = vm_status(serde_json::json!({
            "name": "rhel9",
            "pipeline": [{"name": "PreHook", "error": {}}]
        }));
        assert!(vm.failed_step().is_none());
    }

    #[test]
    fn vm_matches_by_id_or_name() {
        let vm = vm_status(serde_json::json!({"id": "vm-7", "name": "win2019"}));
        assert!(vm.matches("vm-7"));
        assert!(vm.matches("win2019"));
        assert!(!vm.matches("other"));
    }

    #[test]
    fn migration_serializes_cutover_only_when_set() {
        let cold = Migration::new(
            "m",
            MigrationSpec {
                plan: ObjectRef::new("plan", "ns"),
                cutover: None,
            },
        );
        let json = serde_json::to_value(&cold).unwrap();
        assert!(json["spec"].get("cutover").is_none());
        assert!(cold.is_for_plan("plan", "ns"));
        assert!(!cold.is_for_plan("plan", "other"));
    }
}
