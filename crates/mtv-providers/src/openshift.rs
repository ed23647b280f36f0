//! OpenShift Virtualization adapter
//!
//! Reads KubeVirt `VirtualMachine`/`VirtualMachineInstance` objects and the
//! PVCs behind their volumes. Used both as a migration source and to read
//! migrated VMs on the destination cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use tracing::{debug, info};

use mtv_common::crd::{ProviderType, NETWORK_TYPE_POD};
use mtv_common::{Error, Result};

use crate::adapter::{screen_listing, ProviderAdapter, VmListing};
use crate::snapshot::{
    datastore_from_path, normalize_mac, Cpu, Disk, NetworkIdentity, Nic, PowerState, SnapshotInfo,
    VmHandle, VmSnapshot,
};

/// PVC annotation naming the source disk a migrated volume was copied from
pub const DISK_SOURCE_ANNOTATION: &str = "forklift.konveyor.io/disk-source";
/// PVC annotation carrying the endpoint CDI imported the volume from
pub const IMPORT_ENDPOINT_ANNOTATION: &str = "cdi.kubevirt.io/storage.import.endpoint";
const OS_ANNOTATION: &str = "vm.kubevirt.io/os";
const PROVIDER: &str = "openshift";

fn kubevirt_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: "kubevirt.io".to_string(),
        version: "v1".to_string(),
        api_version: "kubevirt.io/v1".to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

fn snapshot_resource() -> ApiResource {
    ApiResource {
        group: "snapshot.kubevirt.io".to_string(),
        version: "v1beta1".to_string(),
        api_version: "snapshot.kubevirt.io/v1beta1".to_string(),
        kind: "VirtualMachineSnapshot".to_string(),
        plural: "virtualmachinesnapshots".to_string(),
    }
}

/// Bytes in a Kubernetes quantity (`10Gi`, `512M`, `1024`)
pub fn parse_quantity(q: &str) -> Option<u64> {
    let q = q.trim();
    let split = q
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(q.len());
    let (num, suffix) = q.split_at(split);
    let value: f64 = num.parse().ok()?;
    let multiplier: f64 = match suffix {
        "" => 1.0,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

fn power_state(printable_status: &str) -> PowerState {
    match printable_status {
        "Running" => PowerState::On,
        "Stopped" => PowerState::Off,
        _ => PowerState::Other,
    }
}

fn arr<'a>(v: &'a Value, pointer: &str) -> impl Iterator<Item = &'a Value> {
    v.pointer(pointer)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn str_at<'a>(v: &'a Value, pointer: &str) -> Option<&'a str> {
    v.pointer(pointer).and_then(Value::as_str)
}

/// Claim name behind a VM volume
fn volume_claim(volume: &Value) -> Option<&str> {
    str_at(volume, "/persistentVolumeClaim/claimName").or_else(|| str_at(volume, "/dataVolume/name"))
}

/// Network name as seen by the verifier: `pod`, or the multus attachment
/// name without its namespace
fn network_name(network: &Value) -> String {
    if network.get("pod").is_some() {
        return NETWORK_TYPE_POD.to_string();
    }
    match str_at(network, "/multus/networkName") {
        Some(full) => full.rsplit('/').next().unwrap_or(full).to_string(),
        None => "Unknown".to_string(),
    }
}

fn pvc_disk(name: &str, pvc: &PersistentVolumeClaim) -> Disk {
    let spec = pvc.spec.as_ref();
    let capacity = pvc
        .status
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get("storage"))
        .or_else(|| {
            spec.and_then(|s| s.resources.as_ref())
                .and_then(|r| r.requests.as_ref())
                .and_then(|r| r.get("storage"))
        })
        .and_then(|q| parse_quantity(&q.0))
        .unwrap_or_default();
    let annotations = pvc.metadata.annotations.as_ref();
    let source_storage = annotations
        .and_then(|a| a.get(DISK_SOURCE_ANNOTATION))
        .map(|src| datastore_from_path(src).unwrap_or(src).to_string());

    Disk {
        name: name.to_string(),
        size_in_kb: capacity / 1024,
        storage_name: spec
            .and_then(|s| s.storage_class_name.clone())
            .unwrap_or_default(),
        storage_id: None,
        access_modes: spec
            .and_then(|s| s.access_modes.clone())
            .unwrap_or_default(),
        source_storage,
        vddk_url: annotations.and_then(|a| a.get(IMPORT_ENDPOINT_ANNOTATION)).cloned(),
    }
}

/// CPU topology count, 1 when unset and saturating when out of range
fn cpu_count(domain: &Value, pointer: &str) -> u32 {
    let count = domain.pointer(pointer).and_then(Value::as_u64).unwrap_or(1);
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Translate a KubeVirt VM (plus its instance, claims and snapshots) into a
/// [`VmSnapshot`]
pub fn vm_snapshot(
    vm: &Value,
    vmi: Option<&Value>,
    pvcs: &BTreeMap<String, PersistentVolumeClaim>,
    snapshots: &[Value],
) -> Result<VmSnapshot> {
    let name = str_at(vm, "/metadata/name")
        .ok_or_else(|| Error::provider_permanent(PROVIDER, "VirtualMachine has no name"))?
        .to_string();
    let namespace = str_at(vm, "/metadata/namespace").map(str::to_string);
    let template = vm
        .pointer("/spec/template/spec")
        .ok_or_else(|| Error::provider_permanent(PROVIDER, format!("VM {name} has no template")))?;
    let domain = &template["domain"];

    let cpu = Cpu {
        num_sockets: cpu_count(domain, "/cpu/sockets"),
        num_cores: cpu_count(domain, "/cpu/cores"),
    };
    let memory = str_at(domain, "/memory/guest")
        .or_else(|| str_at(domain, "/resources/requests/memory"))
        .and_then(parse_quantity)
        .unwrap_or_default();

    let mut disks = Vec::new();
    for volume in arr(template, "/volumes") {
        let Some(claim) = volume_claim(volume) else {
            continue;
        };
        let volume_name = str_at(volume, "/name").unwrap_or(claim);
        match pvcs.get(claim) {
            Some(pvc) => disks.push(pvc_disk(volume_name, pvc)),
            None => debug!(vm = %name, claim, "PVC not found for volume"),
        }
    }

    let networks: BTreeMap<&str, String> = arr(template, "/networks")
        .filter_map(|n| Some((str_at(n, "/name")?, network_name(n))))
        .collect();
    let vmi_ips: BTreeMap<&str, &str> = vmi
        .into_iter()
        .flat_map(|i| arr(i, "/status/interfaces"))
        .filter_map(|i| Some((str_at(i, "/name")?, str_at(i, "/ipAddress")?)))
        .collect();
    let network_interfaces = arr(domain, "/devices/interfaces")
        .filter_map(|iface| {
            let iface_name = str_at(iface, "/name")?;
            Some(Nic {
                name: iface_name.to_string(),
                mac_address: normalize_mac(str_at(iface, "/macAddress").unwrap_or_default()),
                network: NetworkIdentity::named(
                    networks
                        .get(iface_name)
                        .cloned()
                        .unwrap_or_else(|| "Unknown".to_string()),
                ),
                ip: vmi_ips.get(iface_name).map(|ip| ip.to_string()),
            })
        })
        .collect();

    let agent_connected = vmi.is_some_and(|i| {
        arr(i, "/status/conditions").any(|c| {
            str_at(c, "/type") == Some("AgentConnected") && str_at(c, "/status") == Some("True")
        })
    });
    let win_os = str_at(vm, &format!("/metadata/annotations/{}", OS_ANNOTATION.replace('/', "~1")))
        .is_some_and(|os| os.contains("win"))
        || domain.pointer("/features/hyperv").is_some();

    let mut handle = VmHandle::new(&name, format!("{}/{}", namespace.as_deref().unwrap_or_default(), name));
    handle.namespace = namespace;

    Ok(VmSnapshot {
        provider_type: ProviderType::Openshift,
        power_state: power_state(str_at(vm, "/status/printableStatus").unwrap_or_default()),
        cpu,
        memory_in_mb: memory / 1024 / 1024,
        disks,
        network_interfaces,
        snapshots_data: snapshots
            .iter()
            .map(|s| SnapshotInfo {
                name: str_at(s, "/metadata/name").unwrap_or_default().to_string(),
                id: str_at(s, "/metadata/uid").unwrap_or_default().to_string(),
                create_time: str_at(s, "/metadata/creationTimestamp").map(str::to_string),
                state: str_at(s, "/status/phase").map(str::to_string),
            })
            .collect(),
        guest_agent_running: agent_connected,
        win_os,
        native_handle: handle,
        name,
    })
}

/// Cluster reads and writes used by the adapter
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubevirtApi: Send + Sync {
    /// VirtualMachine objects in a namespace
    async fn list_vms(&self, namespace: &str) -> Result<Vec<Value>>;
    /// A VirtualMachine, if present
    async fn get_vm(&self, name: &str, namespace: &str) -> Result<Option<Value>>;
    /// The running instance of a VM, if any
    async fn get_vmi(&self, name: &str, namespace: &str) -> Result<Option<Value>>;
    /// A PVC, if present
    async fn get_pvc(&self, name: &str, namespace: &str) -> Result<Option<PersistentVolumeClaim>>;
    /// VirtualMachineSnapshots taken of a VM
    async fn list_snapshots(&self, vm: &str, namespace: &str) -> Result<Vec<Value>>;
    /// Merge-patch a VM's spec
    async fn patch_vm_spec(&self, name: &str, namespace: &str, spec: Value) -> Result<()>;
}

/// [`KubevirtApi`] over a kube client
pub struct KubevirtClient {
    client: Client,
}

impl KubevirtClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, namespace: &str, ar: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, ar)
    }
}

fn to_value(obj: DynamicObject) -> Result<Value> {
    Ok(serde_json::to_value(obj)?)
}

#[async_trait]
impl KubevirtApi for KubevirtClient {
    async fn list_vms(&self, namespace: &str) -> Result<Vec<Value>> {
        let ar = kubevirt_resource("VirtualMachine", "virtualmachines");
        let list = self.dynamic(namespace, &ar).list(&ListParams::default()).await?;
        list.items.into_iter().map(to_value).collect()
    }

    async fn get_vm(&self, name: &str, namespace: &str) -> Result<Option<Value>> {
        let ar = kubevirt_resource("VirtualMachine", "virtualmachines");
        self.dynamic(namespace, &ar).get_opt(name).await?.map(to_value).transpose()
    }

    async fn get_vmi(&self, name: &str, namespace: &str) -> Result<Option<Value>> {
        let ar = kubevirt_resource("VirtualMachineInstance", "virtualmachineinstances");
        self.dynamic(namespace, &ar).get_opt(name).await?.map(to_value).transpose()
    }

    async fn get_pvc(&self, name: &str, namespace: &str) -> Result<Option<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_snapshots(&self, vm: &str, namespace: &str) -> Result<Vec<Value>> {
        let list = self
            .dynamic(namespace, &snapshot_resource())
            .list(&ListParams::default())
            .await?;
        Ok(list
            .items
            .into_iter()
            .map(to_value)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|s| str_at(s, "/spec/source/name") == Some(vm))
            .collect())
    }

    async fn patch_vm_spec(&self, name: &str, namespace: &str, spec: Value) -> Result<()> {
        let ar = kubevirt_resource("VirtualMachine", "virtualmachines");
        self.dynamic(namespace, &ar)
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "spec": spec })),
            )
            .await?;
        Ok(())
    }
}

/// OpenShift implementation of [`ProviderAdapter`]
pub struct OpenshiftAdapter<A = KubevirtClient> {
    api: A,
    namespace: String,
}

impl<A: KubevirtApi> OpenshiftAdapter<A> {
    /// Adapter reading VMs from `namespace` unless a call names another
    pub fn new(api: A, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
        }
    }

    async fn vm(&self, name: &str, namespace: &str) -> Result<Value> {
        self.api
            .get_vm(name, namespace)
            .await?
            .ok_or_else(|| Error::VmNotFound {
                vm: name.to_string(),
                provider: PROVIDER.to_string(),
            })
    }

    async fn set_running(&self, vm: &VmHandle, running: bool) -> Result<()> {
        let namespace = vm.namespace.as_deref().unwrap_or(&self.namespace);
        let current = self.vm(&vm.name, namespace).await?;
        let spec = if current.pointer("/spec/running").is_some() {
            json!({ "running": running })
        } else {
            json!({ "runStrategy": if running { "Always" } else { "Halted" } })
        };
        info!(vm = %vm.name, %namespace, running, "Setting VM run state");
        self.api.patch_vm_spec(&vm.name, namespace, spec).await
    }
}

#[async_trait]
impl<A: KubevirtApi> ProviderAdapter for OpenshiftAdapter<A> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Openshift
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_vms(&self, query: Option<String>) -> Result<Vec<VmHandle>> {
        let listing = self
            .api
            .list_vms(&self.namespace)
            .await?
            .iter()
            .filter_map(|vm| str_at(vm, "/metadata/name"))
            .map(|name| {
                let mut handle = VmHandle::new(name, format!("{}/{}", self.namespace, name));
                handle.namespace = Some(self.namespace.clone());
                VmListing::healthy(handle)
            })
            .collect();
        Ok(screen_listing(ProviderType::Openshift, query.as_deref(), listing)?
            .into_iter()
            .map(|l| l.handle)
            .collect())
    }

    async fn snapshot(&self, vm_name: &str, namespace: Option<String>) -> Result<VmSnapshot> {
        let namespace = namespace.unwrap_or_else(|| self.namespace.clone());
        let vm = self.vm(vm_name, &namespace).await?;
        let vmi = self.api.get_vmi(vm_name, &namespace).await?;

        let mut pvcs = BTreeMap::new();
        for volume in arr(&vm, "/spec/template/spec/volumes") {
            if let Some(claim) = volume_claim(volume) {
                if let Some(pvc) = self.api.get_pvc(claim, &namespace).await? {
                    pvcs.insert(claim.to_string(), pvc);
                }
            }
        }
        let snapshots = self.api.list_snapshots(vm_name, &namespace).await?;
        vm_snapshot(&vm, vmi.as_ref(), &pvcs, &snapshots)
    }

    async fn start(&self, vm: &VmHandle) -> Result<()> {
        self.set_running(vm, true).await
    }

    async fn stop(&self, vm: &VmHandle) -> Result<()> {
        self.set_running(vm, false).await
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
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, PersistentVolumeClaimStatus};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn vm_json() -> Value {
        json!({
            "metadata": {
                "name": "rhel9",
                "namespace": "mtv-api-tests",
                "annotations": {"vm.kubevirt.io/os": "rhel9"}
            },
            "spec": {
                "runStrategy": "Always",
                "template": {"spec": {
                    "domain": {
                        "cpu": {"sockets": 2, "cores": 2},
                        "memory": {"guest": "4Gi"},
                        "devices": {"interfaces": [
                            {"name": "net-0", "macAddress": "00:50:56:AA:BB:01"},
                            {"name": "net-1", "macAddress": "00:50:56:aa:bb:02"}
                        ]}
                    },
                    "networks": [
                        {"name": "net-0", "pod": {}},
                        {"name": "net-1", "multus": {"networkName": "mtv-api-tests/mtv-bridge"}}
                    ],
                    "volumes": [
                        {"name": "vol-0", "persistentVolumeClaim": {"claimName": "rhel9-disk-0"}},
                        {"name": "cloudinit", "cloudInitNoCloud": {"userData": ""}}
                    ]
                }}
            },
            "status": {"printableStatus": "Running"}
        })
    }

    fn vmi_json(agent: &str) -> Value {
        json!({
            "status": {
                "conditions": [{"type": "AgentConnected", "status": agent}],
                "interfaces": [{"name": "net-0", "ipAddress": "10.128.2.15"}]
            }
        })
    }

    fn pvc(annotation: Option<&str>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("rhel9-disk-0".into()),
                annotations: annotation.map(|a| {
                    BTreeMap::from([(DISK_SOURCE_ANNOTATION.to_string(), a.to_string())])
                }),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                storage_class_name: Some("ocs-storagecluster-ceph-rbd".into()),
                access_modes: Some(vec!["ReadWriteMany".into()]),
                ..Default::default()
            }),
            status: Some(PersistentVolumeClaimStatus {
                capacity: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity("20Gi".into()),
                )])),
                ..Default::default()
            }),
        }
    }

    fn pvcs(annotation: Option<&str>) -> BTreeMap<String, PersistentVolumeClaim> {
        BTreeMap::from([("rhel9-disk-0".to_string(), pvc(annotation))])
    }

    mod translation {
        use super::*;

        #[test]
        fn reads_topology_memory_and_power() {
            let snap = vm_snapshot(&vm_json(), Some(&vmi_json("True")), &pvcs(None), &[]).unwrap();
            assert_eq!(
                snap.cpu,
                Cpu {
                    num_sockets: 2,
                    num_cores: 2
                }
            );
            assert_eq!(snap.memory_in_mb, 4096);
            assert_eq!(snap.power_state, PowerState::On);
            assert!(snap.guest_agent_running);
            assert!(!snap.win_os);
            assert_eq!(snap.native_handle.namespace.as_deref(), Some("mtv-api-tests"));
        }

        #[test]
        fn oversized_topology_saturates() {
            let mut vm = vm_json();
            vm["spec"]["template"]["spec"]["domain"]["cpu"]["sockets"] = json!(4294967296u64);
            let snap = vm_snapshot(&vm, None, &pvcs(None), &[]).unwrap();
            assert_eq!(snap.cpu.num_sockets, u32::MAX);
            assert_eq!(snap.cpu.num_cores, 2);
        }

        #[test]
        fn nics_carry_pod_or_short_multus_name() {
            let snap = vm_snapshot(&vm_json(), Some(&vmi_json("True")), &pvcs(None), &[]).unwrap();
            let nets: Vec<_> = snap
                .network_interfaces
                .iter()
                .map(|n| n.network.name.as_deref().unwrap())
                .collect();
            assert_eq!(nets, vec!["pod", "mtv-bridge"]);
            assert_eq!(snap.network_interfaces[0].mac_address, "00:50:56:aa:bb:01");
            assert_eq!(snap.network_interfaces[0].ip.as_deref(), Some("10.128.2.15"));
        }

        #[test]
        fn disks_come_from_claims() {
            let snap = vm_snapshot(
                &vm_json(),
                None,
                &pvcs(Some("[datastore2] rhel9/rhel9_1.vmdk")),
                &[],
            )
            .unwrap();
            assert_eq!(snap.disks.len(), 1);
            let disk = &snap.disks[0];
            assert_eq!(disk.name, "vol-0");
            assert_eq!(disk.storage_name, "ocs-storagecluster-ceph-rbd");
            assert_eq!(disk.access_modes, vec!["ReadWriteMany"]);
            assert_eq!(disk.size_in_kb, 20 * 1024 * 1024);
            assert_eq!(disk.source_storage.as_deref(), Some("datastore2"));
            assert_eq!(disk.vddk_url, None);
        }

        #[test]
        fn disk_import_endpoint_is_read_from_claim() {
            let mut claim = pvc(None);
            claim.metadata.annotations = Some(BTreeMap::from([(
                IMPORT_ENDPOINT_ANNOTATION.to_string(),
                "https://10.6.46.30/sdk".to_string(),
            )]));
            let claims = BTreeMap::from([("rhel9-disk-0".to_string(), claim)]);
            let snap = vm_snapshot(&vm_json(), None, &claims, &[]).unwrap();
            assert_eq!(snap.disks[0].vddk_url.as_deref(), Some("https://10.6.46.30/sdk"));
            assert_eq!(snap.disks[0].source_storage, None);
        }

        #[test]
        fn agent_requires_connected_condition() {
            let snap = vm_snapshot(&vm_json(), Some(&vmi_json("False")), &pvcs(None), &[]).unwrap();
            assert!(!snap.guest_agent_running);
            let snap = vm_snapshot(&vm_json(), None, &pvcs(None), &[]).unwrap();
            assert!(!snap.guest_agent_running);
        }

        #[test]
        fn windows_from_annotation_or_hyperv() {
            let mut vm = vm_json();
            vm["metadata"]["annotations"]["vm.kubevirt.io/os"] = json!("windows2k22");
            assert!(vm_snapshot(&vm, None, &pvcs(None), &[]).unwrap().win_os);

            let mut vm = vm_json();
            vm["metadata"]["annotations"] = json!({});
            vm["spec"]["template"]["spec"]["domain"]["features"] = json!({"hyperv": {}});
            assert!(vm_snapshot(&vm, None, &pvcs(None), &[]).unwrap().win_os);
        }

        #[test]
        fn stopped_vm_is_off() {
            let mut vm = vm_json();
            vm["status"]["printableStatus"] = json!("Stopped");
            let snap = vm_snapshot(&vm, None, &pvcs(None), &[]).unwrap();
            assert_eq!(snap.power_state, PowerState::Off);
        }
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("4Gi"), Some(4 * 1024 * 1024 * 1024));
        assert_eq!(parse_quantity("512Mi"), Some(512 * 1024 * 1024));
        assert_eq!(parse_quantity("1G"), Some(1_000_000_000));
        assert_eq!(parse_quantity("2048"), Some(2048));
        assert_eq!(parse_quantity("1.5Gi"), Some(1610612736));
        assert_eq!(parse_quantity("12Xi"), None);
    }

    #[tokio::test]
    async fn stop_patches_run_strategy() {
        let mut api = MockKubevirtApi::new();
        api.expect_get_vm().returning(|_, _| Ok(Some(vm_json())));
        api.expect_patch_vm_spec()
            .withf(|name, ns, spec| {
                name == "rhel9" && ns == "mtv-api-tests" && spec == &json!({"runStrategy": "Halted"})
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let adapter = OpenshiftAdapter::new(api, "mtv-api-tests");
        adapter.stop(&VmHandle::new("rhel9", "mtv-api-tests/rhel9")).await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_in_other_namespace_reads_there() {
        let mut api = MockKubevirtApi::new();
        api.expect_get_vm()
            .withf(|_, ns| ns == "target-ns")
            .returning(|_, _| Ok(Some(vm_json())));
        api.expect_get_vmi().returning(|_, _| Ok(None));
        api.expect_get_pvc().returning(|_, _| Ok(Some(pvc(None))));
        api.expect_list_snapshots().returning(|_, _| Ok(vec![]));
        let adapter = OpenshiftAdapter::new(api, "source-ns");
        let snap = adapter
            .snapshot("rhel9", Some("target-ns".to_string()))
            .await
            .unwrap();
        assert_eq!(snap.disks.len(), 1);
    }

    #[tokio::test]
    async fn missing_vm_is_not_found() {
        let mut api = MockKubevirtApi::new();
        api.expect_get_vm().returning(|_, _| Ok(None));
        let adapter = OpenshiftAdapter::new(api, "ns");
        let err = adapter.snapshot("ghost", None).await.unwrap_err();
        assert!(matches!(err, Error::VmNotFound { .. }));
    }
}
