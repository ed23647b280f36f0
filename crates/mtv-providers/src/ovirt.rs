//! oVirt / RHV adapter over the engine REST API (JSON)

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use tracing::{debug, info};

use mtv_common::crd::ProviderType;
use mtv_common::{poll_until, Error, Result};

use crate::adapter::{ensure_session, screen_listing, ProviderAdapter, SessionCell, VmListing};
use crate::snapshot::{
    normalize_mac, Cpu, Disk, NetworkIdentity, Nic, PowerState, SnapshotInfo, VmHandle, VmSnapshot,
};

/// Event code the engine records when a user powers a VM off
pub const USER_STOP_VM_EVENT: i64 = 33;
const PROVIDER: &str = "ovirt";

/// VM status and identity from a list call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OvirtVmRef {
    /// VM id
    pub id: String,
    /// VM name
    pub name: String,
    /// `up`, `down`, `image_locked`, ...
    pub status: String,
}

/// NIC with its network resolved through the vNIC profile
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OvirtNic {
    /// NIC name (nic1)
    pub name: String,
    /// MAC address
    pub mac: String,
    /// Logical network id
    pub network_id: Option<String>,
    /// Logical network name
    pub network_name: Option<String>,
    /// First reported IPv4 address
    pub ip: Option<String>,
}

/// Disk attachment with its storage domain
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OvirtDisk {
    /// Disk alias
    pub name: String,
    /// Provisioned size in bytes
    pub provisioned_size: u64,
    /// Storage domain id
    pub storage_domain_id: Option<String>,
    /// Storage domain name
    pub storage_domain_name: String,
}

/// Snapshot entry
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OvirtSnapshot {
    /// Snapshot id
    pub id: String,
    /// Description (the engine's snapshot label)
    pub description: String,
    /// Creation date
    pub date: Option<String>,
    /// `ok`, `locked`, `in_preview`
    pub status: Option<String>,
}

/// Everything read for one VM
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OvirtVm {
    /// Identity and status
    pub vm: OvirtVmRef,
    /// CPU sockets
    pub sockets: u32,
    /// Cores per socket
    pub cores: u32,
    /// Memory in bytes
    pub memory_bytes: u64,
    /// `os.type`
    pub os_type: String,
    /// Guest agent reported OS details
    pub guest_os_reported: bool,
    /// NICs
    pub nics: Vec<OvirtNic>,
    /// Disks
    pub disks: Vec<OvirtDisk>,
    /// Snapshots
    pub snapshots: Vec<OvirtSnapshot>,
}

fn power_state(status: &str) -> PowerState {
    match status {
        "up" => PowerState::On,
        "down" => PowerState::Off,
        _ => PowerState::Other,
    }
}

/// Translate an engine VM into a [`VmSnapshot`]
pub fn vm_snapshot(vm: &OvirtVm) -> VmSnapshot {
    VmSnapshot {
        name: vm.vm.name.clone(),
        provider_type: ProviderType::Ovirt,
        power_state: power_state(&vm.vm.status),
        cpu: Cpu {
            num_sockets: vm.sockets,
            num_cores: vm.cores,
        },
        memory_in_mb: vm.memory_bytes / 1024 / 1024,
        disks: vm
            .disks
            .iter()
            .map(|d| Disk {
                name: d.name.clone(),
                size_in_kb: d.provisioned_size / 1024,
                storage_name: d.storage_domain_name.clone(),
                storage_id: d.storage_domain_id.clone(),
                ..Default::default()
            })
            .collect(),
        network_interfaces: vm
            .nics
            .iter()
            .map(|n| Nic {
                name: n.name.clone(),
                mac_address: normalize_mac(&n.mac),
                network: NetworkIdentity {
                    id: n.network_id.clone(),
                    name: n.network_name.clone(),
                },
                ip: n.ip.clone(),
            })
            .collect(),
        snapshots_data: vm
            .snapshots
            .iter()
            .map(|s| SnapshotInfo {
                name: s.description.clone(),
                id: s.id.clone(),
                create_time: s.date.clone(),
                state: s.status.clone(),
            })
            .collect(),
        guest_agent_running: vm.vm.status == "up" && vm.guest_os_reported,
        win_os: vm.os_type.contains("win"),
        native_handle: VmHandle::new(&vm.vm.name, &vm.vm.id),
    }
}

/// Engine operations used by the adapter
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OvirtApi: Send + Sync {
    /// SSO login, returning a bearer token
    async fn login(&self) -> Result<String>;
    /// Whether the token is still accepted
    async fn session_alive(&self, token: &str) -> Result<bool>;
    /// Revoke the token
    async fn logout(&self, token: &str) -> Result<()>;
    /// VMs matching an engine search expression (`None` lists all)
    async fn search_vms(&self, token: &str, search: Option<String>) -> Result<Vec<OvirtVmRef>>;
    /// Full read of one VM
    async fn get_vm(&self, token: &str, id: &str) -> Result<OvirtVm>;
    /// Event codes recorded for a VM
    async fn event_codes(&self, token: &str, id: &str) -> Result<Vec<i64>>;
    /// Start action
    async fn start(&self, token: &str, id: &str) -> Result<()>;
    /// Shutdown action
    async fn shutdown(&self, token: &str, id: &str) -> Result<()>;
    /// Clone action
    async fn clone_vm(&self, token: &str, id: &str, new_name: &str) -> Result<()>;
}

/// Engine REST client
pub struct EngineClient {
    http: reqwest::Client,
    base: String,
    username: String,
    password: String,
}

fn count(v: &Value) -> u32 {
    u32::try_from(number(v)).unwrap_or(u32::MAX)
}

fn number(v: &Value) -> u64 {
    match v {
        Value::Number(n) => n.as_u64().unwrap_or_default(),
        Value::String(s) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

fn items<'a>(v: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    v[key].as_array().into_iter().flatten()
}

fn string(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

impl EngineClient {
    /// Client for `https://{host}/ovirt-engine`
    pub fn new(
        url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        insecure: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(Duration::from_secs(60))
            .build()?;
        let host = url.trim_start_matches("https://").trim_end_matches('/');
        let host = host.split('/').next().unwrap_or(host);
        Ok(Self {
            http,
            base: format!("https://{host}/ovirt-engine"),
            username: username.into(),
            password: password.into(),
        })
    }

    async fn get(&self, token: &str, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/api/{}", self.base, path))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn action(&self, token: &str, id: &str, action: &str, body: Value) -> Result<()> {
        debug!(vm = %id, action, "oVirt VM action");
        self.http
            .post(format!("{}/api/vms/{}/{}", self.base, id, action))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn nics(&self, token: &str, id: &str) -> Result<Vec<OvirtNic>> {
        let nics = self.get(token, &format!("vms/{id}/nics")).await?;
        let mut out = Vec::new();
        for nic in items(&nics, "nic") {
            let nic_id = string(nic, "/id").unwrap_or_default();
            let (mut network_id, mut network_name) = (None, None);
            if let Some(profile) = string(nic, "/vnic_profile/id") {
                let profile = self.get(token, &format!("vnicprofiles/{profile}")).await?;
                network_id = string(&profile, "/network/id");
                if let Some(net) = &network_id {
                    let network = self.get(token, &format!("networks/{net}")).await?;
                    network_name = string(&network, "/name");
                }
            }
            let devices = self
                .get(token, &format!("vms/{id}/nics/{nic_id}/reporteddevices"))
                .await
                .unwrap_or(Value::Null);
            let ip = items(&devices, "reported_device")
                .flat_map(|d| d.pointer("/ips/ip").and_then(Value::as_array).into_iter().flatten())
                .find(|ip| ip["version"] == "v4")
                .and_then(|ip| string(ip, "/address"));
            out.push(OvirtNic {
                name: string(nic, "/name").unwrap_or_default(),
                mac: string(nic, "/mac/address").unwrap_or_default(),
                network_id,
                network_name,
                ip,
            });
        }
        Ok(out)
    }

    async fn disks(&self, token: &str, id: &str) -> Result<Vec<OvirtDisk>> {
        let attachments = self
            .get(token, &format!("vms/{id}/diskattachments?follow=disk"))
            .await?;
        let mut out = Vec::new();
        for attachment in items(&attachments, "disk_attachment") {
            let disk = &attachment["disk"];
            let domain_id = disk
                .pointer("/storage_domains/storage_domain/0/id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let domain_name = match &domain_id {
                Some(sd) => string(&self.get(token, &format!("storagedomains/{sd}")).await?, "/name")
                    .unwrap_or_default(),
                None => String::new(),
            };
            out.push(OvirtDisk {
                name: string(disk, "/alias")
                    .or_else(|| string(disk, "/name"))
                    .unwrap_or_default(),
                provisioned_size: number(&disk["provisioned_size"]),
                storage_domain_id: domain_id,
                storage_domain_name: domain_name,
            });
        }
        Ok(out)
    }
}

fn vm_ref(vm: &Value) -> OvirtVmRef {
    OvirtVmRef {
        id: string(vm, "/id").unwrap_or_default(),
        name: string(vm, "/name").unwrap_or_default(),
        status: string(vm, "/status").unwrap_or_default(),
    }
}

#[async_trait]
impl OvirtApi for EngineClient {
    async fn login(&self) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/sso/oauth/token", self.base))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "password"),
                ("scope", "ovirt-app-api"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let body: Value = resp.json().await?;
        string(&body, "/access_token").ok_or_else(|| {
            let reason = string(&body, "/error_description").unwrap_or_default();
            Error::provider_permanent(PROVIDER, format!("SSO login failed: {reason}"))
        })
    }

    async fn session_alive(&self, token: &str) -> Result<bool> {
        let resp = self
            .http
            .get(format!("{}/api", self.base))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    async fn logout(&self, token: &str) -> Result<()> {
        self.http
            .post(format!("{}/sso/oauth/revoke", self.base))
            .form(&[("token", token), ("scope", "")])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn search_vms(&self, token: &str, search: Option<String>) -> Result<Vec<OvirtVmRef>> {
        let path = match search {
            Some(q) => format!("vms?search={}", q.replace(' ', "+").replace('=', "%3D")),
            None => "vms".to_string(),
        };
        let vms = self.get(token, &path).await?;
        Ok(items(&vms, "vm").map(vm_ref).collect())
    }

    async fn get_vm(&self, token: &str, id: &str) -> Result<OvirtVm> {
        let vm = self.get(token, &format!("vms/{id}")).await?;
        let snapshots = self.get(token, &format!("vms/{id}/snapshots")).await?;
        Ok(OvirtVm {
            vm: vm_ref(&vm),
            sockets: count(&vm["cpu"]["topology"]["sockets"]),
            cores: count(&vm["cpu"]["topology"]["cores"]),
            memory_bytes: number(&vm["memory"]),
            os_type: string(&vm, "/os/type").unwrap_or_default(),
            guest_os_reported: vm.get("guest_operating_system").is_some(),
            nics: self.nics(token, id).await?,
            disks: self.disks(token, id).await?,
            snapshots: items(&snapshots, "snapshot")
                .map(|s| OvirtSnapshot {
                    id: string(s, "/id").unwrap_or_default(),
                    description: string(s, "/description").unwrap_or_default(),
                    date: s.get("date").map(|d| match d {
                        Value::String(v) => v.clone(),
                        other => other.to_string(),
                    }),
                    status: string(s, "/snapshot_status"),
                })
                .collect(),
        })
    }

    async fn event_codes(&self, token: &str, id: &str) -> Result<Vec<i64>> {
        let events = self
            .get(token, &format!("events?search=Vms.id%3D{id}"))
            .await?;
        Ok(items(&events, "event")
            .map(|e| number(&e["code"]) as i64)
            .collect())
    }

    async fn start(&self, token: &str, id: &str) -> Result<()> {
        self.action(token, id, "start", json!({})).await
    }

    async fn shutdown(&self, token: &str, id: &str) -> Result<()> {
        self.action(token, id, "shutdown", json!({})).await
    }

    async fn clone_vm(&self, token: &str, id: &str, new_name: &str) -> Result<()> {
        self.action(token, id, "clone", json!({"vm": {"name": new_name}}))
            .await
    }
}

/// oVirt implementation of [`ProviderAdapter`]
pub struct OvirtAdapter<A = EngineClient> {
    api: A,
    session: SessionCell,
    clone_timeout: Duration,
}

impl<A: OvirtApi> OvirtAdapter<A> {
    /// Adapter over the given API client
    pub fn new(api: A) -> Self {
        Self {
            api,
            session: SessionCell::default(),
            clone_timeout: Duration::from_secs(20 * 60),
        }
    }

    async fn token(&self) -> Result<String> {
        ensure_session(
            &self.session,
            ProviderType::Ovirt,
            |t| async move { self.api.session_alive(&t).await },
            || self.api.login(),
        )
        .await
    }

    async fn find(&self, token: &str, name: &str) -> Result<OvirtVmRef> {
        self.api
            .search_vms(token, Some(format!("name={name}")))
            .await?
            .into_iter()
            .find(|v| v.name == name)
            .ok_or_else(|| Error::VmNotFound {
                vm: name.to_string(),
                provider: PROVIDER.to_string(),
            })
    }
}

#[async_trait]
impl<A: OvirtApi> ProviderAdapter for OvirtAdapter<A> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ovirt
    }

    async fn connect(&self) -> Result<()> {
        self.token().await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(token) = self.session.take() {
            info!("Disconnecting from oVirt");
            self.api.logout(&token).await?;
        }
        Ok(())
    }

    async fn list_vms(&self, query: Option<String>) -> Result<Vec<VmHandle>> {
        let token = self.token().await?;
        let listing = self
            .api
            .search_vms(&token, None)
            .await?
            .into_iter()
            .map(|v| VmListing::healthy(VmHandle::new(v.name, v.id)))
            .collect();
        Ok(screen_listing(ProviderType::Ovirt, query.as_deref(), listing)?
            .into_iter()
            .map(|l| l.handle)
            .collect())
    }

    async fn snapshot(&self, vm_name: &str, _namespace: Option<String>) -> Result<VmSnapshot> {
        let token = self.token().await?;
        let found = self.find(&token, vm_name).await?;
        Ok(vm_snapshot(&self.api.get_vm(&token, &found.id).await?))
    }

    async fn start(&self, vm: &VmHandle) -> Result<()> {
        let token = self.token().await?;
        let current = self.find(&token, &vm.name).await?;
        if current.status != "up" {
            info!(vm = %vm.name, "Starting VM");
            self.api.start(&token, &current.id).await?;
        }
        Ok(())
    }

    async fn stop(&self, vm: &VmHandle) -> Result<()> {
        let token = self.token().await?;
        let current = self.find(&token, &vm.name).await?;
        if current.status == "up" {
            info!(vm = %vm.name, "Shutting down VM");
            self.api.shutdown(&token, &current.id).await?;
        }
        Ok(())
    }

    async fn clone_vm(&self, source_name: &str, new_name: &str) -> Result<VmHandle> {
        let token = self.token().await?;
        let source = self.find(&token, source_name).await?;
        info!(source = %source_name, clone = %new_name, "Cloning VM");
        self.api.clone_vm(&token, &source.id, new_name).await?;

        poll_until(
            self.clone_timeout,
            Duration::from_secs(5),
            &format!("clone {new_name} did not finish"),
            || async {
                match self.find(&token, new_name).await {
                    Ok(vm) => Ok(vm.status == "down"),
                    Err(Error::VmNotFound { .. }) => Ok(false),
                    Err(e) => Err(e),
                }
            },
        )
        .await?;
        let cloned = self.find(&token, new_name).await?;
        Ok(VmHandle::new(cloned.name, cloned.id))
    }

    async fn power_off_event_recorded(&self, vm: &VmHandle) -> Result<bool> {
        let token = self.token().await?;
        let codes = self.api.event_codes(&token, &vm.id).await?;
        Ok(codes.contains(&USER_STOP_VM_EVENT))
    }
}
