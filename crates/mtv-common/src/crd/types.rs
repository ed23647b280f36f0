//! Shared types used across the Forklift custom resources

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::kube_utils::HasConditionFields;

/// Condition category marking terminal plan outcomes
pub const CATEGORY_ADVISORY: &str = "Advisory";
/// Condition category for the admission (Ready) condition
pub const CATEGORY_REQUIRED: &str = "Required";

/// Source hypervisor or target platform type
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// VMware vSphere / vCenter
    #[default]
    Vsphere,
    /// oVirt / Red Hat Virtualization
    #[serde(alias = "rhv")]
    Ovirt,
    /// OpenStack
    Openstack,
    /// OVA files on an NFS share
    Ova,
    /// OpenShift Virtualization (KubeVirt)
    Openshift,
}

impl ProviderType {
    /// Forklift's name for this provider type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vsphere => "vsphere",
            Self::Ovirt => "ovirt",
            Self::Openstack => "openstack",
            Self::Ova => "ova",
            Self::Openshift => "openshift",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vsphere" => Ok(Self::Vsphere),
            "ovirt" | "rhv" => Ok(Self::Ovirt),
            "openstack" => Ok(Self::Openstack),
            "ova" => Ok(Self::Ova),
            "openshift" => Ok(Self::Openshift),
            _ => Err(format!("unknown provider type: {s}")),
        }
    }
}

/// Reference to a namespaced object by name
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectRef {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
}

impl ObjectRef {
    /// Create a reference from name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Source and destination provider pair shared by plans and maps
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderPair {
    /// Source provider
    pub source: ObjectRef,
    /// Destination provider
    pub destination: ObjectRef,
}

/// Forklift status condition
///
/// Unlike core Kubernetes conditions these carry a `category`, and the
/// terminal plan outcome is signalled by an `Advisory` condition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g., Ready, Executing, Succeeded, Failed)
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    /// Condition category (Required, Advisory, Critical, Error, Warn)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last transition timestamp, kept verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Create a condition with the given type, status and category
    pub fn new(
        type_: impl Into<String>,
        status: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            category: Some(category.into()),
            ..Default::default()
        }
    }

    /// Category as a plain string, empty when unset
    pub fn category(&self) -> &str {
        self.category.as_deref().unwrap_or_default()
    }
}

impl HasConditionFields for Condition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}
