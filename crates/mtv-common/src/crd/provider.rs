//! Forklift Provider and Hook custom resources

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ObjectRef, ProviderType};

/// Provider spec
///
/// Example:
/// ```yaml
/// apiVersion: forklift.konveyor.io/v1beta1
/// kind: Provider
/// metadata:
///   name: vsphere-8
///   namespace: openshift-mtv
/// spec:
///   type: vsphere
///   url: https://vcenter.example.com/sdk
///   secret:
///     name: vsphere-8-credentials
///     namespace: openshift-mtv
///   settings:
///     vddkInitImage: quay.io/example/vddk:8
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "Provider",
    namespaced,
    status = "ProviderStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Provider type
    #[serde(rename = "type")]
    pub provider_type: ProviderType,

    /// API endpoint, empty for the local OpenShift host provider
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Credentials secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<ObjectRef>,

    /// Provider-specific settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

/// Provider status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderStatus {
    /// Provider conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Phase (Ready, ConnectionFailed, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Hook spec: an Ansible playbook run in a pod at a plan step
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "Hook",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HookSpec {
    /// Runner image
    pub image: String,

    /// Base64-encoded playbook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,

    /// Service account the hook pod runs as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Deadline in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,
}

/// Default hook runner image
pub const DEFAULT_HOOK_IMAGE: &str = "quay.io/kubev2v/hook-runner";
