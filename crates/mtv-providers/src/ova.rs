//! OVA adapter
//!
//! OVA appliances have no hypervisor API; everything known about them comes
//! from the Forklift inventory's parse of the OVF descriptors. The VMs are
//! always powered off and cannot be started or cloned.

use async_trait::async_trait;
use serde_json::Value;

use mtv_common::crd::ProviderType;
use mtv_common::{Error, Result};

use crate::adapter::{screen_listing, ProviderAdapter, VmListing};
use crate::inventory::{ForkliftInventory, InventoryApi, InventoryClient};
use crate::snapshot::{normalize_mac, Cpu, Disk, NetworkIdentity, Nic, PowerState, VmHandle, VmSnapshot};

const PROVIDER: &str = "ova";

fn u64_field(v: &Value, key: &str) -> u64 {
    v[key].as_u64().unwrap_or_default()
}

fn str_field(v: &Value, key: &str) -> String {
    v[key].as_str().unwrap_or_default().to_string()
}

/// Translate an inventory OVA VM record into a [`VmSnapshot`]
pub fn vm_snapshot(vm: &Value) -> VmSnapshot {
    let cpu_count = u32::try_from(u64_field(vm, "cpuCount")).unwrap_or(u32::MAX);
    let num_cores = u32::try_from(u64_field(vm, "coresPerSocket"))
        .unwrap_or(u32::MAX)
        .max(1);
    let name = str_field(vm, "name");

    let network_names: Vec<(String, String)> = vm["networks"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|n| (str_field(n, "id"), str_field(n, "name")))
        .collect();

    VmSnapshot {
        provider_type: ProviderType::Ova,
        power_state: PowerState::Off,
        cpu: Cpu {
            num_sockets: cpu_count / num_cores,
            num_cores,
        },
        memory_in_mb: u64_field(vm, "memoryMB"),
        disks: vm["disks"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|d| Disk {
                name: str_field(d, "name"),
                size_in_kb: u64_field(d, "capacity") / 1024,
                storage_name: str_field(d, "filePath"),
                storage_id: d["id"].as_str().map(str::to_string),
                ..Default::default()
            })
            .collect(),
        network_interfaces: vm["nics"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|n| {
                let network = str_field(n, "network");
                let id = network_names
                    .iter()
                    .find(|(_, net_name)| *net_name == network)
                    .map(|(id, _)| id.clone());
                Nic {
                    name: str_field(n, "name"),
                    mac_address: normalize_mac(&str_field(n, "mac")),
                    network: NetworkIdentity {
                        id,
                        name: Some(network),
                    },
                    ip: None,
                }
            })
            .collect(),
        snapshots_data: Vec::new(),
        guest_agent_running: false,
        win_os: str_field(vm, "osType").to_ascii_lowercase().contains("win"),
        native_handle: VmHandle::new(&name, str_field(vm, "id")),
        name,
    }
}

/// OVA implementation of [`ProviderAdapter`]
pub struct OvaAdapter<A = InventoryClient> {
    inventory: ForkliftInventory<A>,
}

impl<A: InventoryApi> OvaAdapter<A> {
    /// Adapter over an inventory view of the OVA provider
    pub fn new(inventory: ForkliftInventory<A>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl<A: InventoryApi> ProviderAdapter for OvaAdapter<A> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ova
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_vms(&self, query: Option<String>) -> Result<Vec<VmHandle>> {
        let listing = self
            .inventory
            .vms()
            .await?
            .into_iter()
            .map(|vm| VmListing::healthy(VmHandle::new(vm.name, vm.id)))
            .collect();
        Ok(screen_listing(ProviderType::Ova, query.as_deref(), listing)?
            .into_iter()
            .map(|l| l.handle)
            .collect())
    }

    async fn snapshot(&self, vm_name: &str, _namespace: Option<String>) -> Result<VmSnapshot> {
        Ok(vm_snapshot(&self.inventory.get_vm(vm_name).await?))
    }

    async fn start(&self, _vm: &VmHandle) -> Result<()> {
        Err(Error::unsupported(PROVIDER, "start"))
    }

    async fn stop(&self, _vm: &VmHandle) -> Result<()> {
        Ok(())
    }

    async fn clone_vm(&self, _source_name: &str, _new_name: &str) -> Result<VmHandle> {
        Err(Error::unsupported(PROVIDER, "clone_vm"))
    }

    async fn power_off_event_recorded(&self, _vm: &VmHandle) -> Result<bool> {
        Ok(false)
    }
}
