//! NetworkMap and StorageMap construction
//!
//! Source references come from the inventory, distinct and in the order the
//! inventory reports them. The network heuristic is positional: the first
//! source network goes to the pod network and every later one to the
//! configured multus attachment.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use mtv_common::crd::{
    MapSource, NetworkDestination, NetworkMap, NetworkMapSpec, NetworkPair, OffloadPlugin,
    ProviderPair, StorageDestination, StorageMap, StorageMapSpec, StoragePair,
    VsphereXcopyConfig,
};
use mtv_common::{Error, Result, CREATED_BY_VALUE, LABEL_CREATED_BY};

/// Network map entries for the given source networks
///
/// With `pod_only` every source maps to the pod network. Otherwise index 0
/// maps to pod and the rest to `multus_network_name` in `target_namespace`.
pub fn network_map_entries(
    sources: &[MapSource],
    target_namespace: &str,
    multus_network_name: &str,
    pod_only: bool,
) -> Vec<NetworkPair> {
    sources
        .iter()
        .enumerate()
        .map(|(index, source)| NetworkPair {
            source: source.clone(),
            destination: if pod_only || index == 0 {
                NetworkDestination::pod()
            } else {
                NetworkDestination::multus(multus_network_name, target_namespace)
            },
        })
        .collect()
}

/// Storage map entries sending every source storage to `storage_class`
pub fn storage_map_entries(sources: &[MapSource], storage_class: &str) -> Vec<StoragePair> {
    sources
        .iter()
        .map(|source| StoragePair {
            source: source.clone(),
            destination: StorageDestination {
                storage_class: storage_class.to_string(),
                ..Default::default()
            },
            offload_plugin: None,
        })
        .collect()
}

/// Offload plugin descriptor referencing the storage credentials secret
pub fn offload_plugin(secret_name: &str, storage_vendor_product: &str) -> OffloadPlugin {
    OffloadPlugin {
        vsphere_xcopy_config: VsphereXcopyConfig {
            secret_ref: secret_name.to_string(),
            storage_vendor_product: storage_vendor_product.to_string(),
        },
    }
}

/// Storage map entries for a copy-offload migration
///
/// One entry per datastore id (primary, then secondary), each carrying the
/// offload plugin and the optional access/volume mode overrides.
pub fn copy_offload_storage_map_entries(
    datastore_id: Option<&str>,
    secondary_datastore_id: Option<&str>,
    storage_class: &str,
    offload_plugin: Option<&OffloadPlugin>,
    access_mode: Option<&str>,
    volume_mode: Option<&str>,
) -> Result<Vec<StoragePair>> {
    let primary = match (datastore_id, secondary_datastore_id) {
        (Some(primary), _) => primary,
        (None, Some(_)) => {
            return Err(Error::validation_for_field(
                "StorageMap",
                "secondary_datastore_id",
                "secondary_datastore_id requires datastore_id to be set",
            ))
        }
        (None, None) => {
            return Err(Error::validation_for_field(
                "StorageMap",
                "datastore_id",
                "copy-offload requires datastore_id",
            ))
        }
    };
    let plugin = offload_plugin.ok_or_else(|| {
        Error::validation_for_field(
            "StorageMap",
            "offload_plugin",
            "datastore_id requires offload_plugin to be set",
        )
    })?;

    let datastores: Vec<&str> = std::iter::once(primary)
        .chain(secondary_datastore_id)
        .collect();
    info!(?datastores, "Building copy-offload storage map");

    Ok(datastores
        .into_iter()
        .map(|id| StoragePair {
            source: MapSource::by_id(id),
            destination: StorageDestination {
                storage_class: storage_class.to_string(),
                access_mode: access_mode.map(str::to_string),
                volume_mode: volume_mode.map(str::to_string),
            },
            offload_plugin: Some(plugin.clone()),
        })
        .collect())
}

fn map_metadata(name: &str, namespace: &str) -> ObjectMeta {
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

/// NetworkMap resource ready to create
pub fn network_map(
    name: &str,
    namespace: &str,
    provider: ProviderPair,
    map: Vec<NetworkPair>,
) -> NetworkMap {
    NetworkMap {
        metadata: map_metadata(name, namespace),
        spec: NetworkMapSpec { provider, map },
        status: None,
    }
}

/// StorageMap resource ready to create
pub fn storage_map(
    name: &str,
    namespace: &str,
    provider: ProviderPair,
    map: Vec<StoragePair>,
) -> StorageMap {
    StorageMap {
        metadata: map_metadata(name, namespace),
        spec: StorageMapSpec { provider, map },
        status: None,
    }
}
