//! Forklift NetworkMap and StorageMap custom resources
//!
//! Both are ordered source → destination lists shared by a Plan and the
//! post-migration checks. Entries are matched against the source side by
//! id, name or (for networks) type.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ProviderPair};

/// Destination type for pod networking
pub const NETWORK_TYPE_POD: &str = "pod";
/// Destination type for a multus network attachment
pub const NETWORK_TYPE_MULTUS: &str = "multus";

/// Source side of a mapping entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MapSource {
    /// Inventory id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Inventory name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Network type on the source (OpenShift sources: "pod" or "multus")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

impl MapSource {
    /// Source entry addressed by inventory id
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Source entry addressed by name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Destination network of a network map entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkDestination {
    /// "pod" or "multus"
    #[serde(rename = "type")]
    pub type_: String,

    /// NetworkAttachmentDefinition name for multus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// NetworkAttachmentDefinition namespace for multus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl NetworkDestination {
    /// Pod network destination
    pub fn pod() -> Self {
        Self {
            type_: NETWORK_TYPE_POD.to_string(),
            ..Default::default()
        }
    }

    /// Multus network destination
    pub fn multus(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            type_: NETWORK_TYPE_MULTUS.to_string(),
            name: Some(name.into()),
            namespace: Some(namespace.into()),
        }
    }

    /// True for the pod network
    pub fn is_pod(&self) -> bool {
        self.type_ == NETWORK_TYPE_POD
    }
}

/// One network map entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkPair {
    /// Source network
    pub source: MapSource,
    /// Destination network
    pub destination: NetworkDestination,
}

/// NetworkMap spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "NetworkMap",
    namespaced,
    status = "MapStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMapSpec {
    /// Providers this map applies to
    pub provider: ProviderPair,
    /// Ordered entries
    pub map: Vec<NetworkPair>,
}

/// Destination storage of a storage map entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageDestination {
    /// Target storage class
    pub storage_class: String,

    /// Explicit PVC access mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<String>,

    /// Explicit PVC volume mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<String>,
}

/// Storage-array copy plugin settings for vSphere XCOPY
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VsphereXcopyConfig {
    /// Secret holding the storage array credentials
    pub secret_ref: String,
    /// Storage vendor product (e.g., ontap, vantara)
    pub storage_vendor_product: String,
}

/// Copy-offload plugin descriptor
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OffloadPlugin {
    /// vSphere XCOPY plugin settings
    pub vsphere_xcopy_config: VsphereXcopyConfig,
}

/// One storage map entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoragePair {
    /// Source datastore / storage domain / volume type
    pub source: MapSource,
    /// Destination storage
    pub destination: StorageDestination,
    /// Copy-offload plugin, when storage-array copy is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offload_plugin: Option<OffloadPlugin>,
}

/// StorageMap spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "StorageMap",
    namespaced,
    status = "MapStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StorageMapSpec {
    /// Providers this map applies to
    pub provider: ProviderPair,
    /// Ordered entries
    pub map: Vec<StoragePair>,
}

/// Status shared by both map kinds
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MapStatus {
    /// Map conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_pair_uses_forklift_field_names() {
        let pair = StoragePair {
            source: MapSource::by_id("datastore-12"),
            destination: StorageDestination {
                storage_class: "ontap-nas".to_string(),
                access_mode: Some("ReadWriteOnce".to_string()),
                volume_mode: Some("Block".to_string()),
            },
            offload_plugin: Some(OffloadPlugin {
                vsphere_xcopy_config: VsphereXcopyConfig {
                    secret_ref: "copy-offload-storage".to_string(),
                    storage_vendor_product: "ontap".to_string(),
                },
            }),
        };
        let json = serde_json::to_value(&pair).unwrap();
        assert_eq!(json["source"], serde_json::json!({"id": "datastore-12"}));
        assert_eq!(json["destination"]["storageClass"], "ontap-nas");
        assert_eq!(json["destination"]["accessMode"], "ReadWriteOnce");
        assert_eq!(json["destination"]["volumeMode"], "Block");
        assert_eq!(
            json["offloadPlugin"]["vsphereXcopyConfig"]["secretRef"],
            "copy-offload-storage"
        );
        assert_eq!(
            json["offloadPlugin"]["vsphereXcopyConfig"]["storageVendorProduct"],
            "ontap"
        );
    }

    #[test]
    fn network_destinations() {
        assert_eq!(
            serde_json::to_value(NetworkDestination::pod()).unwrap(),
            serde_json::json!({"type": "pod"})
        );
        let multus = NetworkDestination::multus("mtv-bridge", "mtv-tests");
        assert!(!multus.is_pod());
        assert_eq!(
            serde_json::to_value(&multus).unwrap(),
            serde_json::json!({"type": "multus", "name": "mtv-bridge", "namespace": "mtv-tests"})
        );
    }

    #[test]
    fn map_source_reads_type_field() {
        let src: MapSource = serde_json::from_value(serde_json::json!({"type": "pod"})).unwrap();
        assert_eq!(src.type_.as_deref(), Some("pod"));
        assert!(src.id.is_none());
    }
}
