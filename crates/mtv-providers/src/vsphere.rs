//! vSphere adapter
//!
//! Talks to vCenter through the VI/JSON API (`/sdk/vim25/{release}`), which
//! exposes the same managed-object graph as the SOAP SDK: a VM's
//! `config.hardware.device`, `runtime.powerState`, `snapshot` tree and
//! `guest` info are read as JSON properties.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use mtv_common::crd::ProviderType;
use mtv_common::{Error, Result};

use crate::adapter::{
    ensure_session, screen_listing, ProviderAdapter, SessionCell, VmHealth, VmListing,
};
use crate::snapshot::{
    datastore_from_path, normalize_mac, Cpu, Disk, NetworkIdentity, Nic, PowerState, SnapshotInfo,
    VmHandle, VmSnapshot,
};

/// VI/JSON release path segment
pub const DEFAULT_VIM_RELEASE: &str = "8.0.1.0";
const SESSION_HEADER: &str = "vmware-api-session-id";
const PROVIDER: &str = "vsphere";

// =============================================================================
// Native model
// =============================================================================

/// Managed object reference
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoRef {
    /// Managed object type (VirtualMachine, Folder, Task, ...)
    #[serde(rename = "type")]
    pub type_: String,
    /// Managed object id (vm-123)
    pub value: String,
}

impl MoRef {
    fn to_json(&self) -> Value {
        json!({"_typeName": "ManagedObjectReference", "type": self.type_, "value": self.value})
    }
}

/// The part of a VM's summary used for enumeration and health
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VimVmSummary {
    /// Managed object id
    pub id: String,
    /// VM name
    pub name: String,
    /// `summary.runtime.connectionState`
    pub connection_state: String,
    /// `summary.config.vmPathName`
    pub vm_path_name: Option<String>,
    /// Number of datastores backing the VM
    pub datastore_count: usize,
}

impl VimVmSummary {
    /// Health screen result
    pub fn health(&self) -> VmHealth {
        if self.connection_state == "inaccessible" {
            return VmHealth::BadDatastore;
        }
        let has_vmx = self
            .vm_path_name
            .as_deref()
            .is_some_and(|p| p.trim_end().ends_with(".vmx"));
        if self.datastore_count == 0 || !has_vmx {
            return VmHealth::MissingDescriptor;
        }
        VmHealth::Healthy
    }
}

/// `VirtualMachineConfigInfo` subset
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VimConfig {
    /// Guest OS identifier (rhel9_64Guest, windows2019srv_64Guest)
    #[serde(default)]
    pub guest_id: String,
    /// Virtual hardware
    pub hardware: VimHardware,
}

/// `VirtualHardware` subset
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct VimHardware {
    /// Total vCPUs
    #[serde(rename = "numCPU")]
    pub num_cpu: u32,
    /// Cores per socket
    #[serde(rename = "numCoresPerSocket", default)]
    pub num_cores_per_socket: u32,
    /// Memory in MiB
    #[serde(rename = "memoryMB")]
    pub memory_mb: u64,
    /// Virtual devices
    #[serde(default)]
    pub device: Vec<VimDevice>,
}

/// Label holder for a device
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct VimDescription {
    /// Device label ("Hard disk 1", "Network adapter 1")
    #[serde(default)]
    pub label: String,
}

/// `VirtualDevice` subset covering NICs and disks
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VimDevice {
    /// Concrete device type (VirtualDisk, VirtualVmxnet3, VirtualE1000e)
    #[serde(rename = "_typeName", default)]
    pub type_name: String,
    /// Device label
    #[serde(default)]
    pub device_info: Option<VimDescription>,
    /// MAC address, set on ethernet cards only
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Capacity in KiB, set on disks only
    #[serde(default)]
    pub capacity_in_kb: Option<u64>,
    /// Backing info, kept as JSON because its shape depends on `_typeName`
    #[serde(default)]
    pub backing: Option<Value>,
}

impl VimDevice {
    fn label(&self) -> String {
        self.device_info
            .as_ref()
            .map(|d| d.label.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// `VirtualMachineSnapshotTree` node
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VimSnapshotTree {
    /// Snapshot name
    pub name: String,
    /// Snapshot id
    pub id: i64,
    /// Creation time
    #[serde(default)]
    pub create_time: Option<String>,
    /// Power state captured in the snapshot
    #[serde(default)]
    pub state: Option<String>,
    /// Children
    #[serde(default)]
    pub child_snapshot_list: Vec<VimSnapshotTree>,
}

/// `GuestNicInfo` subset
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VimGuestNic {
    /// MAC address
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Guest IPs
    #[serde(default)]
    pub ip_address: Vec<String>,
}

/// Everything read for one VM
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VimVm {
    /// Managed object id
    pub id: String,
    /// VM name
    pub name: String,
    /// `config`, absent for inaccessible VMs
    pub config: Option<VimConfig>,
    /// `runtime.powerState`
    pub power_state: String,
    /// `guest.toolsStatus`
    pub tools_status: Option<String>,
    /// `guest.net`
    pub guest_nics: Vec<VimGuestNic>,
    /// `snapshot.rootSnapshotList`
    pub root_snapshots: Vec<VimSnapshotTree>,
    /// Distributed portgroup key → name, for NICs on a DVS
    pub portgroup_names: BTreeMap<String, String>,
}

// =============================================================================
// Translation
// =============================================================================

/// Snapshots along the first-child chain, root first
pub fn snapshot_chain(roots: &[VimSnapshotTree]) -> Vec<&VimSnapshotTree> {
    let mut chain = Vec::new();
    let mut level = roots;
    while let Some(first) = level.first() {
        chain.push(first);
        level = &first.child_snapshot_list;
    }
    chain
}

fn nic_network_name(backing: Option<&Value>, portgroups: &BTreeMap<String, String>) -> String {
    let Some(backing) = backing else {
        return "Unknown".to_string();
    };
    if let Some(name) = backing.get("deviceName").and_then(Value::as_str) {
        return name.to_string();
    }
    if let Some(port) = backing.get("port") {
        return match port.get("portgroupKey").and_then(Value::as_str) {
            Some(key) => portgroups
                .get(key)
                .cloned()
                .unwrap_or_else(|| format!("DVS-{key}")),
            None => "Distributed Virtual Switch".to_string(),
        };
    }
    "Unknown".to_string()
}

fn power_state(raw: &str) -> PowerState {
    match raw {
        "poweredOn" => PowerState::On,
        "poweredOff" => PowerState::Off,
        _ => PowerState::Other,
    }
}

/// Translate a vim VM into a [`VmSnapshot`]
pub fn vm_snapshot(vm: &VimVm) -> Result<VmSnapshot> {
    let config = vm.config.as_ref().ok_or_else(|| {
        Error::provider_permanent(PROVIDER, format!("no config found for VM {}", vm.name))
    })?;
    let hw = &config.hardware;

    let guest_ips: BTreeMap<String, String> = vm
        .guest_nics
        .iter()
        .filter_map(|n| {
            let mac = normalize_mac(n.mac_address.as_deref()?);
            let ip = n.ip_address.iter().find(|ip| !ip.contains(':'))?;
            Some((mac, ip.clone()))
        })
        .collect();

    let mut network_interfaces = Vec::new();
    let mut disks = Vec::new();
    for device in &hw.device {
        if let Some(mac) = &device.mac_address {
            let mac = normalize_mac(mac);
            network_interfaces.push(Nic {
                name: device.label(),
                network: NetworkIdentity::named(nic_network_name(
                    device.backing.as_ref(),
                    &vm.portgroup_names,
                )),
                ip: guest_ips.get(&mac).cloned(),
                mac_address: mac,
            });
        } else if device.type_name == "VirtualDisk" {
            let storage_name = device
                .backing
                .as_ref()
                .and_then(|b| b.get("fileName"))
                .and_then(Value::as_str)
                .and_then(datastore_from_path)
                .unwrap_or("Unknown")
                .to_string();
            disks.push(Disk {
                name: device.label(),
                size_in_kb: device.capacity_in_kb.unwrap_or_default(),
                storage_name,
                ..Default::default()
            });
        }
    }

    let num_cores = hw.num_cores_per_socket.max(1);
    let snapshots_data = snapshot_chain(&vm.root_snapshots)
        .into_iter()
        .map(|s| SnapshotInfo {
            name: s.name.clone(),
            id: s.id.to_string(),
            create_time: s.create_time.clone(),
            state: s.state.clone(),
        })
        .collect();

    Ok(VmSnapshot {
        name: vm.name.clone(),
        provider_type: ProviderType::Vsphere,
        power_state: power_state(&vm.power_state),
        cpu: Cpu {
            num_sockets: hw.num_cpu / num_cores,
            num_cores,
        },
        memory_in_mb: hw.memory_mb,
        disks,
        network_interfaces,
        snapshots_data,
        guest_agent_running: vm.power_state == "poweredOn"
            && vm.tools_status.as_deref() == Some("toolsOk"),
        win_os: config.guest_id.contains("win"),
        native_handle: VmHandle::new(&vm.name, &vm.id),
    })
}

// =============================================================================
// API seam
// =============================================================================

/// vCenter operations used by the adapter
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VsphereApi: Send + Sync {
    /// Log in and return a session id
    async fn login(&self) -> Result<String>;
    /// Whether the session is still valid
    async fn session_alive(&self, token: &str) -> Result<bool>;
    /// Log out
    async fn logout(&self, token: &str) -> Result<()>;
    /// Summaries of every VM in the inventory
    async fn list_vms(&self, token: &str) -> Result<Vec<VimVmSummary>>;
    /// Full read of one VM
    async fn get_vm(&self, token: &str, id: &str) -> Result<VimVm>;
    /// Power on and wait for the task
    async fn power_on(&self, token: &str, id: &str) -> Result<()>;
    /// Power off and wait for the task
    async fn power_off(&self, token: &str, id: &str) -> Result<()>;
    /// Clone into the source VM's folder, returning the new VM id
    async fn clone_vm(&self, token: &str, id: &str, new_name: &str) -> Result<String>;
}

/// VI/JSON HTTP client
pub struct VimClient {
    http: reqwest::Client,
    base: String,
    username: String,
    password: String,
}

impl VimClient {
    /// Client for `https://{host}/sdk/vim25/{release}`
    pub fn new(
        host: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        insecure: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(Duration::from_secs(60))
            .build()?;
        let host = host
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .trim_end_matches("/sdk");
        Ok(Self {
            http,
            base: format!("https://{}/sdk/vim25/{}", host, DEFAULT_VIM_RELEASE),
            username: username.into(),
            password: password.into(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, token: &str, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(format!("{}/{}", self.base, path))
            .header(SESSION_HEADER, token)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base, path))
            .header(SESSION_HEADER, token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        Ok(resp.json().await?)
    }

    async fn wait_task(&self, token: &str, task: MoRef, action: &str, timeout: Duration) -> Result<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let info: Value = self.get(token, &format!("Task/{}/info", task.value)).await?;
            match info.get("state").and_then(Value::as_str) {
                Some("success") => {
                    info!(action, "vSphere task completed");
                    return Ok(info.get("result").cloned().unwrap_or(Value::Null));
                }
                Some("error") => {
                    let msg = info
                        .pointer("/error/localizedMessage")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    return Err(Error::provider_permanent(
                        PROVIDER,
                        format!("{action} failed: {msg}"),
                    ));
                }
                state => debug!(action, ?state, progress = ?info.get("progress"), "vSphere task running"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout {
                    message: format!("vSphere task {action}"),
                    timeout_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn run_task(&self, token: &str, id: &str, method: &str, body: Value, timeout: Duration) -> Result<Value> {
        let task: MoRef =
            serde_json::from_value(self.post(token, &format!("VirtualMachine/{id}/{method}"), body).await?)?;
        self.wait_task(token, task, &format!("{method} {id}"), timeout).await
    }
}

#[async_trait]
impl VsphereApi for VimClient {
    async fn login(&self) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/SessionManager/SessionManager/Login", self.base))
            .json(&json!({"userName": self.username, "password": self.password}))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::provider_permanent(PROVIDER, "login rejected"));
        }
        let resp = resp.error_for_status()?;
        resp.headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::provider(PROVIDER, "login returned no session id"))
    }

    async fn session_alive(&self, token: &str) -> Result<bool> {
        let session: Value = self
            .get(token, "SessionManager/SessionManager/currentSession")
            .await?;
        Ok(!session.is_null())
    }

    async fn logout(&self, token: &str) -> Result<()> {
        self.post(token, "SessionManager/SessionManager/Logout", json!({}))
            .await?;
        Ok(())
    }

    async fn list_vms(&self, token: &str) -> Result<Vec<VimVmSummary>> {
        let content: Value = self
            .get(token, "ServiceInstance/ServiceInstance/content")
            .await?;
        let root: MoRef = serde_json::from_value(content["rootFolder"].clone())?;
        let view_manager: MoRef = serde_json::from_value(content["viewManager"].clone())?;
        let view: MoRef = serde_json::from_value(
            self.post(
                token,
                &format!("ViewManager/{}/CreateContainerView", view_manager.value),
                json!({"container": root.to_json(), "type": ["VirtualMachine"], "recursive": true}),
            )
            .await?,
        )?;
        let vms: Vec<MoRef> = self
            .get(token, &format!("ContainerView/{}/view", view.value))
            .await?;

        let mut summaries = Vec::with_capacity(vms.len());
        for vm in &vms {
            let summary: Value = self
                .get(token, &format!("VirtualMachine/{}/summary", vm.value))
                .await?;
            let datastores: Vec<MoRef> = self
                .get(token, &format!("VirtualMachine/{}/datastore", vm.value))
                .await?;
            summaries.push(VimVmSummary {
                id: vm.value.clone(),
                name: summary
                    .pointer("/config/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                connection_state: summary
                    .pointer("/runtime/connectionState")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                vm_path_name: summary
                    .pointer("/config/vmPathName")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                datastore_count: datastores.len(),
            });
        }

        self.post(token, &format!("ContainerView/{}/DestroyView", view.value), json!({}))
            .await?;
        Ok(summaries)
    }

    async fn get_vm(&self, token: &str, id: &str) -> Result<VimVm> {
        let name: String = self.get(token, &format!("VirtualMachine/{id}/name")).await?;
        let config: Option<VimConfig> = self.get(token, &format!("VirtualMachine/{id}/config")).await?;
        let runtime: Value = self.get(token, &format!("VirtualMachine/{id}/runtime")).await?;
        let guest: Value = self.get(token, &format!("VirtualMachine/{id}/guest")).await?;
        let snapshot: Value = self.get(token, &format!("VirtualMachine/{id}/snapshot")).await?;

        let mut portgroup_names = BTreeMap::new();
        if let Some(cfg) = &config {
            for device in &cfg.hardware.device {
                let key = device
                    .backing
                    .as_ref()
                    .and_then(|b| b.pointer("/port/portgroupKey"))
                    .and_then(Value::as_str);
                if let Some(key) = key {
                    let pg: Result<String> = self
                        .get(token, &format!("DistributedVirtualPortgroup/{key}/name"))
                        .await;
                    if let Ok(pg_name) = pg {
                        portgroup_names.insert(key.to_string(), pg_name);
                    }
                }
            }
        }

        Ok(VimVm {
            id: id.to_string(),
            name,
            config,
            power_state: runtime["powerState"].as_str().unwrap_or_default().to_string(),
            tools_status: guest["toolsStatus"].as_str().map(str::to_string),
            guest_nics: serde_json::from_value(guest["net"].clone()).unwrap_or_default(),
            root_snapshots: serde_json::from_value(snapshot["rootSnapshotList"].clone())
                .unwrap_or_default(),
            portgroup_names,
        })
    }

    async fn power_on(&self, token: &str, id: &str) -> Result<()> {
        self.run_task(token, id, "PowerOnVM_Task", json!({}), Duration::from_secs(60))
            .await?;
        Ok(())
    }

    async fn power_off(&self, token: &str, id: &str) -> Result<()> {
        self.run_task(token, id, "PowerOffVM_Task", json!({}), Duration::from_secs(60))
            .await?;
        Ok(())
    }

    async fn clone_vm(&self, token: &str, id: &str, new_name: &str) -> Result<String> {
        let folder: MoRef = self.get(token, &format!("VirtualMachine/{id}/parent")).await?;
        let body = json!({
            "folder": folder.to_json(),
            "name": new_name,
            "spec": {
                "_typeName": "VirtualMachineCloneSpec",
                "location": {"_typeName": "VirtualMachineRelocateSpec"},
                "powerOn": false,
                "template": false
            }
        });
        let result = self
            .run_task(token, id, "CloneVM_Task", body, Duration::from_secs(20 * 60))
            .await?;
        let vm: MoRef = serde_json::from_value(result)?;
        Ok(vm.value)
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// vSphere implementation of [`ProviderAdapter`]
pub struct VsphereAdapter<A = VimClient> {
    api: A,
    session: SessionCell,
}

impl<A: VsphereApi> VsphereAdapter<A> {
    /// Adapter over the given API client
    pub fn new(api: A) -> Self {
        Self {
            api,
            session: SessionCell::default(),
        }
    }

    async fn token(&self) -> Result<String> {
        ensure_session(
            &self.session,
            ProviderType::Vsphere,
            |t| async move { self.api.session_alive(&t).await },
            || self.api.login(),
        )
        .await
    }

    async fn find(&self, token: &str, name: &str) -> Result<VimVmSummary> {
        self.api
            .list_vms(token)
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::VmNotFound {
                vm: name.to_string(),
                provider: PROVIDER.to_string(),
            })
    }
}

#[async_trait]
impl<A: VsphereApi> ProviderAdapter for VsphereAdapter<A> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Vsphere
    }

    async fn connect(&self) -> Result<()> {
        self.token().await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(token) = self.session.take() {
            info!("Disconnecting from vSphere");
            self.api.logout(&token).await?;
        }
        Ok(())
    }

    async fn list_vms(&self, query: Option<String>) -> Result<Vec<VmHandle>> {
        let token = self.token().await?;
        let listing = self
            .api
            .list_vms(&token)
            .await?
            .into_iter()
            .map(|s| VmListing {
                health: s.health(),
                handle: VmHandle::new(s.name, s.id),
            })
            .collect();
        Ok(screen_listing(ProviderType::Vsphere, query.as_deref(), listing)?
            .into_iter()
            .map(|l| l.handle)
            .collect())
    }

    async fn snapshot(&self, vm_name: &str, _namespace: Option<String>) -> Result<VmSnapshot> {
        let token = self.token().await?;
        let summary = self.find(&token, vm_name).await?;
        vm_snapshot(&self.api.get_vm(&token, &summary.id).await?)
    }

    async fn start(&self, vm: &VmHandle) -> Result<()> {
        let token = self.token().await?;
        let current = self.api.get_vm(&token, &vm.id).await?;
        if current.power_state != "poweredOn" {
            info!(vm = %vm.name, "Starting VM");
            self.api.power_on(&token, &vm.id).await?;
        }
        Ok(())
    }

    async fn stop(&self, vm: &VmHandle) -> Result<()> {
        let token = self.token().await?;
        let current = self.api.get_vm(&token, &vm.id).await?;
        if current.power_state == "poweredOn" {
            info!(vm = %vm.name, "Stopping VM");
            self.api.power_off(&token, &vm.id).await?;
        }
        Ok(())
    }

    async fn clone_vm(&self, source_name: &str, new_name: &str) -> Result<VmHandle> {
        let token = self.token().await?;
        let source = self.find(&token, source_name).await?;
        info!(source = %source_name, clone = %new_name, "Cloning VM");
        let id = self.api.clone_vm(&token, &source.id, new_name).await?;
        Ok(VmHandle::new(new_name, id))
    }

    async fn power_off_event_recorded(&self, _vm: &VmHandle) -> Result<bool> {
        Ok(false)
    }
}
