//! Provider adapters for VM migration scenarios
//!
//! One [`ProviderAdapter`] per source platform, each translating its native
//! object graph into a [`VmSnapshot`]. The OpenShift adapter doubles as the
//! reader for migrated VMs on the destination cluster.

#![deny(missing_docs)]

pub mod adapter;
pub mod inventory;
pub mod openshift;
pub mod openstack;
pub mod ova;
pub mod ovirt;
pub mod snapshot;
pub mod vsphere;

pub use adapter::{ProviderAdapter, VmHealth, VmListing};
pub use inventory::{ForkliftInventory, InventoryApi, InventoryClient};
pub use snapshot::{Cpu, Disk, NetworkIdentity, Nic, PowerState, SnapshotInfo, VmHandle, VmSnapshot};

use kube::Client;

use mtv_common::crd::ProviderType;
use mtv_common::{Error, HarnessConfig, Result};

/// Inventory client for the configured route
pub fn inventory_client(config: &HarnessConfig) -> Result<InventoryClient> {
    let url = config.inventory_url.as_deref().ok_or_else(|| {
        Error::validation_for_field("config", "inventory_url", "required to query the inventory")
    })?;
    InventoryClient::new(
        url,
        config.inventory_token.clone(),
        config.source_provider.insecure,
    )
}

/// Adapter for the configured source provider
///
/// `provider_name` is the name of the Provider custom resource; the OVA
/// adapter resolves it in the inventory.
pub async fn source_adapter(
    config: &HarnessConfig,
    client: Client,
    provider_name: &str,
) -> Result<Box<dyn ProviderAdapter>> {
    let src = &config.source_provider;
    let host = if src.fqdn.is_empty() {
        src.api_url.as_str()
    } else {
        src.fqdn.as_str()
    };
    Ok(match src.provider_type {
        ProviderType::Vsphere => Box::new(vsphere::VsphereAdapter::new(vsphere::VimClient::new(
            host,
            &src.username,
            &src.password,
            src.insecure,
        )?)),
        ProviderType::Ovirt => Box::new(ovirt::OvirtAdapter::new(ovirt::EngineClient::new(
            host,
            &src.username,
            &src.password,
            src.insecure,
        )?)),
        ProviderType::Openstack => Box::new(openstack::OpenstackAdapter::new(
            openstack::KeystoneClient::from_config(src)?,
        )),
        ProviderType::Ova => {
            let inventory = ForkliftInventory::connect(inventory_client(config)?, provider_name).await?;
            Box::new(ova::OvaAdapter::new(inventory))
        }
        ProviderType::Openshift => Box::new(openshift::OpenshiftAdapter::new(
            openshift::KubevirtClient::new(client),
            src.project_name
                .clone()
                .unwrap_or_else(|| config.target_namespace.clone()),
        )),
    })
}

/// Reader for migrated VMs in the target namespace
pub fn destination_adapter(
    config: &HarnessConfig,
    client: Client,
) -> openshift::OpenshiftAdapter<openshift::KubevirtClient> {
    openshift::OpenshiftAdapter::new(
        openshift::KubevirtClient::new(client),
        config.target_namespace.clone(),
    )
}
