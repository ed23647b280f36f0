//! Forklift inventory client
//!
//! The inventory service mirrors every registered provider under
//! `/providers/<type>/<id>`. Scenarios use it to resolve VM ids and to build
//! the source side of network and storage maps.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use mtv_common::crd::{MapSource, ProviderType, NETWORK_TYPE_MULTUS, NETWORK_TYPE_POD};
use mtv_common::{retry_transient, Error, Result, RetryConfig};

/// Raw GET against the inventory, relative to `/providers`
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// GET `/providers/{path}` (empty path lists all providers)
    async fn get(&self, path: &str) -> Result<Value>;
}

/// HTTP client for the `forklift-inventory` route
pub struct InventoryClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
    retry: RetryConfig,
}

impl InventoryClient {
    /// Client for the given route URL
    pub fn new(url: &str, token: Option<String>, insecure: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(Duration::from_secs(30))
            .build()?;
        let base = if url.starts_with("http://") || url.starts_with("https://") {
            url.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", url.trim_end_matches('/'))
        };
        Ok(Self {
            http,
            base,
            token,
            retry: RetryConfig::with_max_attempts(3),
        })
    }
}

#[async_trait]
impl InventoryApi for InventoryClient {
    async fn get(&self, path: &str) -> Result<Value> {
        let url = if path.is_empty() {
            format!("{}/providers", self.base)
        } else {
            format!("{}/providers/{}", self.base, path)
        };
        debug!(%url, "Inventory request");
        retry_transient(&self.retry, "inventory get", || {
            let mut req = self.http.get(&url);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }
            async move { Ok(req.send().await?.error_for_status()?.json().await?) }
        })
        .await
    }
}

/// Inventory entry for a VM
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct InventoryVm {
    /// Inventory id
    pub id: String,
    /// VM name
    pub name: String,
}

#[derive(Deserialize)]
struct InventoryProvider {
    id: String,
    name: String,
}

/// Inventory view scoped to one registered provider
pub struct ForkliftInventory<A = InventoryClient> {
    api: A,
    provider_name: String,
    provider_type: ProviderType,
    provider_id: String,
}

impl<A: InventoryApi> ForkliftInventory<A> {
    /// Resolve the provider's type and id by name
    pub async fn connect(api: A, provider_name: &str) -> Result<Self> {
        let by_type: Value = api.get("").await?;
        let provider_type = by_type
            .as_object()
            .into_iter()
            .flatten()
            .find(|(_, providers)| {
                providers
                    .as_array()
                    .is_some_and(|list| list.iter().any(|p| p["name"] == provider_name))
            })
            .map(|(kind, _)| kind.clone())
            .ok_or_else(|| not_registered(provider_name))?;

        let providers: Vec<InventoryProvider> =
            serde_json::from_value(api.get(&provider_type).await?)?;
        let provider_id = providers
            .into_iter()
            .find(|p| p.name == provider_name)
            .map(|p| p.id)
            .ok_or_else(|| not_registered(provider_name))?;

        let provider_type = provider_type
            .parse::<ProviderType>()
            .map_err(|e: String| Error::provider_permanent(provider_name, e))?;

        Ok(Self {
            api,
            provider_name: provider_name.to_string(),
            provider_type,
            provider_id,
        })
    }

    /// Provider type as reported by the inventory
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    /// Provider inventory id
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_path(&self) -> String {
        format!("{}/{}", self.provider_type, self.provider_id)
    }

    /// Provider detail record
    pub async fn provider_data(&self) -> Result<Value> {
        self.api.get(&self.provider_path()).await
    }

    /// All VMs known for the provider
    pub async fn vms(&self) -> Result<Vec<InventoryVm>> {
        let vms = self.api.get(&format!("{}/vms", self.provider_path())).await?;
        Ok(serde_json::from_value(vms)?)
    }

    /// Names of all VMs known for the provider
    pub async fn vm_names(&self) -> Result<Vec<String>> {
        Ok(self.vms().await?.into_iter().map(|v| v.name).collect())
    }

    /// Inventory id of a VM by name
    pub async fn vm_id(&self, name: &str) -> Result<String> {
        self.vms()
            .await?
            .into_iter()
            .find(|v| v.name == name)
            .map(|v| v.id)
            .ok_or_else(|| Error::VmNotFound {
                vm: name.to_string(),
                provider: self.provider_name.clone(),
            })
    }

    /// Detail record of a VM by name
    pub async fn get_vm(&self, name: &str) -> Result<Value> {
        let id = self.vm_id(name).await?;
        self.api
            .get(&format!("{}/vms/{}", self.provider_path(), id))
            .await
    }

    async fn sub_resource(&self, kind: &str, id: &str) -> Result<Value> {
        self.api
            .get(&format!("{}/{}/{}", self.provider_path(), kind, id))
            .await
    }

    /// Distinct networks used by `vms`, in first-seen order
    pub async fn network_sources(&self, vms: &[String]) -> Result<Vec<MapSource>> {
        let mut sources = Vec::new();
        for name in vms {
            let vm = self.get_vm(name).await?;
            for source in self.vm_network_sources(&vm).await? {
                push_distinct(&mut sources, source);
            }
        }
        Ok(sources)
    }

    /// Distinct storage used by `vms`, in first-seen order
    pub async fn storage_sources(&self, vms: &[String]) -> Result<Vec<MapSource>> {
        let mut sources = Vec::new();
        for name in vms {
            let vm = self.get_vm(name).await?;
            for source in self.vm_storage_sources(&vm).await? {
                push_distinct(&mut sources, source);
            }
        }
        Ok(sources)
    }

    async fn vm_network_sources(&self, vm: &Value) -> Result<Vec<MapSource>> {
        Ok(match self.provider_type {
            ProviderType::Vsphere | ProviderType::Ova => ref_ids(&vm["networks"]),
            ProviderType::Ovirt => {
                let mut out = Vec::new();
                for profile in string_field(&vm["nics"], "profile") {
                    let profile = self.sub_resource("nicprofiles", &profile).await?;
                    if let Some(network) = profile["network"].as_str() {
                        out.push(MapSource::by_id(network));
                    }
                }
                out
            }
            ProviderType::Openstack => vm["addresses"]
                .as_object()
                .map(|nets| nets.keys().map(MapSource::by_name).collect())
                .unwrap_or_default(),
            ProviderType::Openshift => openshift_network_sources(vm),
        })
    }

    async fn vm_storage_sources(&self, vm: &Value) -> Result<Vec<MapSource>> {
        Ok(match self.provider_type {
            ProviderType::Vsphere => vm["disks"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|d| d.pointer("/datastore/id").and_then(Value::as_str))
                .map(MapSource::by_id)
                .collect(),
            ProviderType::Ova => ref_ids(&vm["disks"]),
            ProviderType::Ovirt => {
                let mut out = Vec::new();
                for disk in string_field(&vm["diskAttachments"], "disk") {
                    let disk = self.sub_resource("disks", &disk).await?;
                    if let Some(domain) = disk["storageDomain"].as_str() {
                        out.push(MapSource::by_id(domain));
                    }
                }
                out
            }
            ProviderType::Openstack => {
                let mut out = Vec::new();
                for volume in string_field(&vm["attachedVolumes"], "ID") {
                    let volume = self.sub_resource("volumes", &volume).await?;
                    if let Some(kind) = volume["volumeType"].as_str() {
                        out.push(MapSource::by_name(kind));
                    }
                }
                out
            }
            ProviderType::Openshift => vm
                .pointer("/object/spec/dataVolumeTemplates")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|dv| {
                    dv.pointer("/spec/storage/storageClassName")
                        .or_else(|| dv.pointer("/spec/pvc/storageClassName"))
                        .and_then(Value::as_str)
                })
                .map(MapSource::by_name)
                .collect(),
        })
    }
}

fn not_registered(provider_name: &str) -> Error {
    Error::provider_permanent(
        provider_name,
        format!("provider {provider_name} not found in inventory"),
    )
}

fn push_distinct(sources: &mut Vec<MapSource>, source: MapSource) {
    if !sources.contains(&source) {
        sources.push(source);
    }
}

fn ref_ids(list: &Value) -> Vec<MapSource> {
    string_field(list, "id").into_iter().map(MapSource::by_id).collect()
}

fn string_field(list: &Value, field: &str) -> Vec<String> {
    list.as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item[field].as_str().map(str::to_string))
        .collect()
}

fn openshift_network_sources(vm: &Value) -> Vec<MapSource> {
    vm.pointer("/object/spec/template/spec/networks")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|net| {
            if net.get("pod").is_some() {
                return Some(MapSource {
                    type_: Some(NETWORK_TYPE_POD.to_string()),
                    ..Default::default()
                });
            }
            let name = net.pointer("/multus/networkName")?.as_str()?;
            Some(MapSource {
                type_: Some(NETWORK_TYPE_MULTUS.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            })
        })
        .collect()
}
