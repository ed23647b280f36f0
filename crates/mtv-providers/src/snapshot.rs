//! Provider-agnostic view of a VM at one instant
//!
//! Every adapter produces a [`VmSnapshot`]; the verifier compares a source
//! snapshot with the destination snapshot of the same VM. Lists are
//! order-irrelevant: NICs are identified by MAC address and disks by name.

use std::fmt;

use serde::{Deserialize, Serialize};

use mtv_common::crd::ProviderType;

/// Power state normalized across providers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    /// Running
    On,
    /// Powered off
    Off,
    /// Suspended, paused, migrating or unknown
    #[default]
    Other,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Other => "other",
        })
    }
}

/// CPU topology
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    /// Socket count
    pub num_sockets: u32,
    /// Cores per socket
    pub num_cores: u32,
}

/// One virtual disk
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Disk label or volume name
    pub name: String,
    /// Capacity in KiB
    pub size_in_kb: u64,
    /// Datastore, storage domain, volume type or storage class backing the disk
    pub storage_name: String,
    /// Inventory id of the backing storage, when the provider exposes one
    pub storage_id: Option<String>,
    /// PVC access modes (destination disks only)
    pub access_modes: Vec<String>,
    /// Source storage the disk was copied from (destination disks only)
    pub source_storage: Option<String>,
    /// Endpoint the disk was imported from (destination disks only)
    pub vddk_url: Option<String>,
}

/// Network a NIC is attached to
///
/// vSphere reports names, oVirt ids and names, OpenShift the pod network as
/// `"pod"` or the multus attachment name without its namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIdentity {
    /// Inventory id
    pub id: Option<String>,
    /// Network name
    pub name: Option<String>,
}

impl NetworkIdentity {
    /// Identity known only by name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }
}

/// One network interface
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic {
    /// Interface label
    pub name: String,
    /// MAC address, lower-cased
    pub mac_address: String,
    /// Attached network
    pub network: NetworkIdentity,
    /// First guest IP reported for this interface
    pub ip: Option<String>,
}

/// One hypervisor snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Snapshot name or description
    pub name: String,
    /// Snapshot id
    pub id: String,
    /// Creation time as reported by the provider
    pub create_time: Option<String>,
    /// Provider-specific state
    pub state: Option<String>,
}

/// Handle to a VM on its provider
///
/// Returned by enumeration and carried inside every [`VmSnapshot`]. Only the
/// adapter that produced it can act on it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmHandle {
    /// VM name
    pub name: String,
    /// Provider-native id (managed object id, UUID, or `namespace/name`)
    pub id: String,
    /// Namespace for OpenShift VMs
    pub namespace: Option<String>,
}

impl VmHandle {
    /// Handle with name and id
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            namespace: None,
        }
    }
}

/// Normalized read of one VM
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VmSnapshot {
    /// VM name
    pub name: String,
    /// Provider that produced this snapshot
    pub provider_type: ProviderType,
    /// Power state
    pub power_state: PowerState,
    /// CPU topology
    pub cpu: Cpu,
    /// Memory in MiB
    pub memory_in_mb: u64,
    /// Disks
    pub disks: Vec<Disk>,
    /// Network interfaces
    pub network_interfaces: Vec<Nic>,
    /// Hypervisor snapshots, oldest first
    pub snapshots_data: Vec<SnapshotInfo>,
    /// Guest agent / tools reported as running
    pub guest_agent_running: bool,
    /// Guest OS is Windows
    pub win_os: bool,
    /// Handle for follow-up operations on the same VM
    pub native_handle: VmHandle,
}

impl VmSnapshot {
    /// NIC with the given MAC address, compared case-insensitively
    pub fn nic_by_mac(&self, mac: &str) -> Option<&Nic> {
        self.network_interfaces
            .iter()
            .find(|n| n.mac_address.eq_ignore_ascii_case(mac))
    }

    /// Disk with the given name
    pub fn disk(&self, name: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.name == name)
    }

    /// Names of the storage backing each disk, deduplicated in disk order
    pub fn disk_storage_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for disk in &self.disks {
            if !names.contains(&disk.storage_name.as_str()) {
                names.push(&disk.storage_name);
            }
        }
        names
    }

    /// First guest IP on any interface
    pub fn guest_ip(&self) -> Option<&str> {
        self.network_interfaces
            .iter()
            .find_map(|n| n.ip.as_deref())
    }
}

/// Normalize a MAC address to lower-case colon form
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().replace('-', ":").to_ascii_lowercase()
}

/// Datastore name from a vSphere file path of the form `[datastore] dir/file`
pub fn datastore_from_path(path: &str) -> Option<&str> {
    let rest = path.trim().strip_prefix('[')?;
    let end = rest.find(']')?;
    let name = rest[..end].trim();
    (!name.is_empty()).then_some(name)
}
