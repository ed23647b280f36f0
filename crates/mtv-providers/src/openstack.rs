//! OpenStack adapter over Keystone v3, Nova, Neutron and Cinder

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::info;

use mtv_common::config::SourceProviderConfig;
use mtv_common::crd::ProviderType;
use mtv_common::{Error, Result};

use crate::adapter::{ensure_session, screen_listing, ProviderAdapter, SessionCell, VmListing};
use crate::snapshot::{
    normalize_mac, Cpu, Disk, NetworkIdentity, Nic, PowerState, SnapshotInfo, VmHandle, VmSnapshot,
};

const PROVIDER: &str = "openstack";
const TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Server identity and status
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerRef {
    /// Server id
    pub id: String,
    /// Server name
    pub name: String,
    /// `ACTIVE`, `SHUTOFF`, `PAUSED`, ...
    pub status: String,
}

/// Neutron port attached to a server
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerPort {
    /// Port id
    pub id: String,
    /// MAC address
    pub mac: String,
    /// Network id
    pub network_id: String,
    /// Network name
    pub network_name: String,
    /// First fixed IP
    pub ip: Option<String>,
}

/// Cinder volume snapshot
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VolumeSnapshot {
    /// Snapshot id
    pub id: String,
    /// Snapshot name
    pub name: String,
    /// Creation time
    pub created_at: Option<String>,
    /// Status
    pub status: Option<String>,
}

/// Cinder volume attached to a server
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerVolume {
    /// Volume id
    pub id: String,
    /// Volume name
    pub name: String,
    /// Size in GiB
    pub size_gb: u64,
    /// Volume type
    pub volume_type: String,
    /// Guest OS type from the image metadata
    pub image_os_type: Option<String>,
    /// Snapshots of this volume
    pub snapshots: Vec<VolumeSnapshot>,
}

/// Everything read for one server
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Server {
    /// Identity and status
    pub server: ServerRef,
    /// Flavor vCPUs
    pub vcpus: u32,
    /// Flavor RAM in MiB
    pub ram_mb: u64,
    /// Ports
    pub ports: Vec<ServerPort>,
    /// Attached volumes
    pub volumes: Vec<ServerVolume>,
}

fn power_state(status: &str) -> PowerState {
    match status {
        "ACTIVE" => PowerState::On,
        "SHUTOFF" => PowerState::Off,
        _ => PowerState::Other,
    }
}

/// Translate a Nova server into a [`VmSnapshot`]
///
/// Nova exposes no socket topology, so every vCPU is reported as a socket
/// with one core.
pub fn vm_snapshot(server: &Server) -> VmSnapshot {
    VmSnapshot {
        name: server.server.name.clone(),
        provider_type: ProviderType::Openstack,
        power_state: power_state(&server.server.status),
        cpu: Cpu {
            num_sockets: server.vcpus,
            num_cores: 1,
        },
        memory_in_mb: server.ram_mb,
        disks: server
            .volumes
            .iter()
            .map(|v| Disk {
                name: v.name.clone(),
                size_in_kb: v.size_gb * 1024 * 1024,
                storage_name: v.volume_type.clone(),
                storage_id: Some(v.id.clone()),
                ..Default::default()
            })
            .collect(),
        network_interfaces: server
            .ports
            .iter()
            .map(|p| Nic {
                name: p.id.clone(),
                mac_address: normalize_mac(&p.mac),
                network: NetworkIdentity {
                    id: Some(p.network_id.clone()),
                    name: Some(p.network_name.clone()),
                },
                ip: p.ip.clone(),
            })
            .collect(),
        snapshots_data: server
            .volumes
            .iter()
            .flat_map(|v| &v.snapshots)
            .map(|s| SnapshotInfo {
                name: s.name.clone(),
                id: s.id.clone(),
                create_time: s.created_at.clone(),
                state: s.status.clone(),
            })
            .collect(),
        guest_agent_running: false,
        win_os: server
            .volumes
            .iter()
            .filter_map(|v| v.image_os_type.as_deref())
            .any(|os| os.to_ascii_lowercase().contains("win")),
        native_handle: VmHandle::new(&server.server.name, &server.server.id),
    }
}

/// OpenStack operations used by the adapter
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OpenstackApi: Send + Sync {
    /// Issue a project-scoped token
    async fn login(&self) -> Result<String>;
    /// Whether the token validates
    async fn session_alive(&self, token: &str) -> Result<bool>;
    /// Revoke the token
    async fn logout(&self, token: &str) -> Result<()>;
    /// All servers in the project
    async fn list_servers(&self, token: &str) -> Result<Vec<ServerRef>>;
    /// Full read of one server
    async fn get_server(&self, token: &str, id: &str) -> Result<Server>;
    /// `os-start` action
    async fn start(&self, token: &str, id: &str) -> Result<()>;
    /// `os-stop` action
    async fn stop(&self, token: &str, id: &str) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
struct Endpoints {
    compute: String,
    network: String,
    volume: String,
}

/// Keystone-authenticated REST client
pub struct KeystoneClient {
    http: reqwest::Client,
    auth_url: String,
    username: String,
    password: String,
    project_name: String,
    user_domain: String,
    project_domain: String,
    region: Option<String>,
    endpoints: RwLock<Endpoints>,
}

impl KeystoneClient {
    /// Client built from the source provider record
    pub fn from_config(cfg: &SourceProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(cfg.insecure)
            .timeout(Duration::from_secs(60))
            .build()?;
        let project_name = cfg.project_name.clone().ok_or_else(|| {
            Error::validation_for_field("source_provider", "project_name", "required for openstack")
        })?;
        Ok(Self {
            http,
            auth_url: cfg.api_url.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            project_name,
            user_domain: cfg.user_domain_name.clone().unwrap_or_else(|| "Default".into()),
            project_domain: cfg
                .project_domain_name
                .clone()
                .unwrap_or_else(|| "Default".into()),
            region: cfg.region_name.clone(),
            endpoints: RwLock::new(Endpoints::default()),
        })
    }

    async fn get(&self, token: &str, url: String) -> Result<Value> {
        Ok(self
            .http
            .get(url)
            .header(TOKEN_HEADER, token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn server_action(&self, token: &str, id: &str, action: &str) -> Result<()> {
        let compute = self.endpoints.read().compute.clone();
        let mut body = serde_json::Map::new();
        body.insert(action.to_string(), Value::Null);
        self.http
            .post(format!("{compute}/servers/{id}/action"))
            .header(TOKEN_HEADER, token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Public endpoint of `service_type` in the token catalog
pub fn catalog_endpoint(catalog: &Value, service_type: &str, region: Option<&str>) -> Option<String> {
    catalog
        .as_array()?
        .iter()
        .find(|svc| svc["type"] == service_type)?["endpoints"]
        .as_array()?
        .iter()
        .find(|ep| {
            ep["interface"] == "public" && region.map_or(true, |r| ep["region"] == r)
        })?["url"]
        .as_str()
        .map(|u| u.trim_end_matches('/').to_string())
}

fn s(v: &Value, key: &str) -> String {
    v[key].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl OpenstackApi for KeystoneClient {
    async fn login(&self) -> Result<String> {
        let body = json!({"auth": {
            "identity": {
                "methods": ["password"],
                "password": {"user": {
                    "name": self.username,
                    "password": self.password,
                    "domain": {"name": self.user_domain}
                }}
            },
            "scope": {"project": {
                "name": self.project_name,
                "domain": {"name": self.project_domain}
            }}
        }});
        let resp = self
            .http
            .post(format!("{}/auth/tokens", self.auth_url))
            .json(&body)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::provider_permanent(PROVIDER, "keystone rejected credentials"));
        }
        let resp = resp.error_for_status()?;
        let token = resp
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::provider(PROVIDER, "keystone returned no token"))?;
        let body: Value = resp.json().await?;

        let catalog = &body["token"]["catalog"];
        let region = self.region.as_deref();
        let endpoint = |kind: &str| {
            catalog_endpoint(catalog, kind, region).ok_or_else(|| {
                Error::provider_permanent(PROVIDER, format!("no public {kind} endpoint in catalog"))
            })
        };
        *self.endpoints.write() = Endpoints {
            compute: endpoint("compute")?,
            network: endpoint("network")?,
            volume: endpoint("volumev3")?,
        };
        Ok(token)
    }

    async fn session_alive(&self, token: &str) -> Result<bool> {
        let resp = self
            .http
            .get(format!("{}/auth/tokens", self.auth_url))
            .header(TOKEN_HEADER, token)
            .header(SUBJECT_TOKEN_HEADER, token)
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    async fn logout(&self, token: &str) -> Result<()> {
        self.http
            .delete(format!("{}/auth/tokens", self.auth_url))
            .header(TOKEN_HEADER, token)
            .header(SUBJECT_TOKEN_HEADER, token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list_servers(&self, token: &str) -> Result<Vec<ServerRef>> {
        let compute = self.endpoints.read().compute.clone();
        let body = self.get(token, format!("{compute}/servers/detail")).await?;
        Ok(body["servers"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|srv| ServerRef {
                id: s(srv, "id"),
                name: s(srv, "name"),
                status: s(srv, "status"),
            })
            .collect())
    }

    async fn get_server(&self, token: &str, id: &str) -> Result<Server> {
        let ep = self.endpoints.read().clone();
        let srv = self.get(token, format!("{}/servers/{id}", ep.compute)).await?;
        let srv = &srv["server"];

        let mut flavor = srv["flavor"].clone();
        if flavor.get("vcpus").is_none() {
            let flavor_id = s(&flavor, "id");
            flavor = self
                .get(token, format!("{}/flavors/{flavor_id}", ep.compute))
                .await?["flavor"]
                .clone();
        }

        let ports = self
            .get(token, format!("{}/v2.0/ports?device_id={id}", ep.network))
            .await?;
        let mut server_ports = Vec::new();
        for port in ports["ports"].as_array().into_iter().flatten() {
            let network_id = s(port, "network_id");
            let network = self
                .get(token, format!("{}/v2.0/networks/{network_id}", ep.network))
                .await?;
            server_ports.push(ServerPort {
                id: s(port, "id"),
                mac: s(port, "mac_address"),
                network_name: s(&network["network"], "name"),
                network_id,
                ip: port
                    .pointer("/fixed_ips/0/ip_address")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        let attachments = self
            .get(token, format!("{}/servers/{id}/os-volume_attachments", ep.compute))
            .await?;
        let mut volumes = Vec::new();
        for attachment in attachments["volumeAttachments"].as_array().into_iter().flatten() {
            let volume_id = s(attachment, "volumeId");
            let volume = self
                .get(token, format!("{}/volumes/{volume_id}", ep.volume))
                .await?;
            let volume = &volume["volume"];
            let snapshots = self
                .get(token, format!("{}/snapshots/detail?volume_id={volume_id}", ep.volume))
                .await?;
            volumes.push(ServerVolume {
                name: s(volume, "name"),
                size_gb: volume["size"].as_u64().unwrap_or_default(),
                volume_type: s(volume, "volume_type"),
                image_os_type: volume
                    .pointer("/volume_image_metadata/os_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                snapshots: snapshots["snapshots"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|snap| VolumeSnapshot {
                        id: s(snap, "id"),
                        name: s(snap, "name"),
                        created_at: snap["created_at"].as_str().map(str::to_string),
                        status: snap["status"].as_str().map(str::to_string),
                    })
                    .collect(),
                id: volume_id,
            });
        }

        Ok(Server {
            server: ServerRef {
                id: s(srv, "id"),
                name: s(srv, "name"),
                status: s(srv, "status"),
            },
            vcpus: u32::try_from(flavor["vcpus"].as_u64().unwrap_or_default()).unwrap_or(u32::MAX),
            ram_mb: flavor["ram"].as_u64().unwrap_or_default(),
            ports: server_ports,
            volumes,
        })
    }

    async fn start(&self, token: &str, id: &str) -> Result<()> {
        self.server_action(token, id, "os-start").await
    }

    async fn stop(&self, token: &str, id: &str) -> Result<()> {
        self.server_action(token, id, "os-stop").await
    }
}

/// OpenStack implementation of [`ProviderAdapter`]
pub struct OpenstackAdapter<A = KeystoneClient> {
    api: A,
    session: SessionCell,
}

impl<A: OpenstackApi> OpenstackAdapter<A> {
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
            ProviderType::Openstack,
            |t| async move { self.api.session_alive(&t).await },
            || self.api.login(),
        )
        .await
    }

    async fn find(&self, token: &str, name: &str) -> Result<ServerRef> {
        self.api
            .list_servers(token)
            .await?
            .into_iter()
            .find(|srv| srv.name == name)
            .ok_or_else(|| Error::VmNotFound {
                vm: name.to_string(),
                provider: PROVIDER.to_string(),
            })
    }
}

#[async_trait]
impl<A: OpenstackApi> ProviderAdapter for OpenstackAdapter<A> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Openstack
    }

    async fn connect(&self) -> Result<()> {
        self.token().await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(token) = self.session.take() {
            info!("Disconnecting from OpenStack");
            self.api.logout(&token).await?;
        }
        Ok(())
    }

    async fn list_vms(&self, query: Option<String>) -> Result<Vec<VmHandle>> {
        let token = self.token().await?;
        let listing = self
            .api
            .list_servers(&token)
            .await?
            .into_iter()
            .map(|srv| VmListing::healthy(VmHandle::new(srv.name, srv.id)))
            .collect();
        Ok(screen_listing(ProviderType::Openstack, query.as_deref(), listing)?
            .into_iter()
            .map(|l| l.handle)
            .collect())
    }

    async fn snapshot(&self, vm_name: &str, _namespace: Option<String>) -> Result<VmSnapshot> {
        let token = self.token().await?;
        let found = self.find(&token, vm_name).await?;
        Ok(vm_snapshot(&self.api.get_server(&token, &found.id).await?))
    }

    async fn start(&self, vm: &VmHandle) -> Result<()> {
        let token = self.token().await?;
        let current = self.find(&token, &vm.name).await?;
        if current.status != "ACTIVE" {
            info!(vm = %vm.name, "Starting server");
            self.api.start(&token, &current.id).await?;
        }
        Ok(())
    }

    async fn stop(&self, vm: &VmHandle) -> Result<()> {
        let token = self.token().await?;
        let current = self.find(&token, &vm.name).await?;
        if current.status == "ACTIVE" {
            info!(vm = %vm.name, "Stopping server");
            self.api.stop(&token, &current.id).await?;
        }
        Ok(())
    }

    async fn clone_vm(&self, _source_name: &str, _new_name: &str) -> Result<VmHandle> {
        Err(Error::unsupported(PROVIDER, "clone_vm"))
    }

    async fn power_off_event_recorded(&self, _vm: &VmHandle) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(status: &str) -> Server {
        Server {
            server: ServerRef {
                id: "srv-1".into(),
                name: "cirros".into(),
                status: status.into(),
            },
            vcpus: 2,
            ram_mb: 1024,
            ports: vec![ServerPort {
                id: "port-1".into(),
                mac: "FA:16:3E:00:00:01".into(),
                network_id: "net-1".into(),
                network_name: "private".into(),
                ip: Some("192.168.0.10".into()),
            }],
            volumes: vec![ServerVolume {
                id: "vol-1".into(),
                name: "cirros-root".into(),
                size_gb: 1,
                volume_type: "tripleo".into(),
                image_os_type: Some("linux".into()),
                snapshots: vec![VolumeSnapshot {
                    id: "snap-1".into(),
                    name: "before".into(),
                    created_at: None,
                    status: Some("available".into()),
                }],
            }],
        }
    }

    #[rstest::rstest]
    #[case::active("ACTIVE", PowerState::On)]
    #[case::shutoff("SHUTOFF", PowerState::Off)]
    #[case::paused("PAUSED", PowerState::Other)]
    #[case::error("ERROR", PowerState::Other)]
    fn maps_server_status(#[case] status: &str, #[case] expected: PowerState) {
        assert_eq!(power_state(status), expected);
    }

    #[test]
    fn vcpus_are_reported_as_sockets() {
        let snap = vm_snapshot(&server("ACTIVE"));
        assert_eq!(
            snap.cpu,
            Cpu {
                num_sockets: 2,
                num_cores: 1
            }
        );
        assert_eq!(snap.power_state, PowerState::On);
        assert!(!snap.guest_agent_running);
    }

    #[test]
    fn volumes_become_disks_on_their_volume_type() {
        let snap = vm_snapshot(&server("SHUTOFF"));
        assert_eq!(snap.power_state, PowerState::Off);
        assert_eq!(snap.disks[0].storage_name, "tripleo");
        assert_eq!(snap.disks[0].size_in_kb, 1024 * 1024);
        assert_eq!(snap.snapshots_data.len(), 1);
        assert_eq!(snap.network_interfaces[0].mac_address, "fa:16:3e:00:00:01");
    }

    #[test]
    fn windows_detected_from_image_metadata() {
        let mut srv = server("PAUSED");
        srv.volumes[0].image_os_type = Some("Windows".into());
        let snap = vm_snapshot(&srv);
        assert!(snap.win_os);
        assert_eq!(snap.power_state, PowerState::Other);
    }

    #[test]
    fn catalog_lookup_prefers_public_endpoint_in_region() {
        let catalog = json!([
            {"type": "identity", "endpoints": []},
            {"type": "compute", "endpoints": [
                {"interface": "internal", "region": "regionOne", "url": "http://nova.internal:8774/v2.1"},
                {"interface": "public", "region": "regionTwo", "url": "https://nova.two:13774/v2.1"},
                {"interface": "public", "region": "regionOne", "url": "https://nova.one:13774/v2.1/"}
            ]}
        ]);
        assert_eq!(
            catalog_endpoint(&catalog, "compute", Some("regionOne")).as_deref(),
            Some("https://nova.one:13774/v2.1")
        );
        assert_eq!(
            catalog_endpoint(&catalog, "compute", None).as_deref(),
            Some("https://nova.two:13774/v2.1")
        );
        assert_eq!(catalog_endpoint(&catalog, "volumev3", None), None);
    }

    #[tokio::test]
    async fn clone_is_unsupported() {
        let adapter = OpenstackAdapter::new(MockOpenstackApi::new());
        let err = adapter.clone_vm("cirros", "copy").await.unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[tokio::test]
    async fn stop_targets_active_server() {
        let mut api = MockOpenstackApi::new();
        api.expect_login().returning(|| Ok("tok".to_string()));
        api.expect_list_servers().returning(|_| {
            Ok(vec![ServerRef {
                id: "srv-1".into(),
                name: "cirros".into(),
                status: "ACTIVE".into(),
            }])
        });
        api.expect_stop()
            .withf(|_, id| id == "srv-1")
            .times(1)
            .returning(|_, _| Ok(()));
        let adapter = OpenstackAdapter::new(api);
        adapter.stop(&VmHandle::new("cirros", "srv-1")).await.unwrap();
    }
}
