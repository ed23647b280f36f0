//! Individual comparisons between a source and a destination snapshot
//!
//! Every check records into a [`Findings`] collector and never returns
//! early on the first mismatch.

use std::fmt::Display;

use mtv_common::config::CEPH_RBD_STORAGE_CLASS;
use mtv_common::crd::{NetworkPair, StoragePair};
use mtv_providers::{PowerState, SnapshotInfo, VmSnapshot};

use crate::integrity::parse_integrity_counter;
use crate::resolve::{expected_access_modes, get_destination};
use crate::{AssertionFailure, Check};

/// Soft-assertion collector for one VM
#[derive(Debug)]
pub struct Findings {
    vm: String,
    failures: Vec<AssertionFailure>,
}

impl Findings {
    /// Empty collector for `vm`
    pub fn new(vm: impl Into<String>) -> Self {
        Self {
            vm: vm.into(),
            failures: Vec::new(),
        }
    }

    /// Record a failure unconditionally
    pub fn fail(
        &mut self,
        check: Check,
        expected: impl Display,
        actual: impl Display,
        message: impl Into<String>,
    ) {
        self.failures.push(AssertionFailure {
            vm: self.vm.clone(),
            check,
            expected: expected.to_string(),
            actual: actual.to_string(),
            message: message.into(),
        });
    }

    /// Record a failure unless `expected == actual`
    pub fn equal<T: PartialEq + Display>(
        &mut self,
        check: Check,
        expected: T,
        actual: T,
        message: impl Into<String>,
    ) {
        if expected != actual {
            self.fail(check, expected, actual, message);
        }
    }

    /// Failures recorded so far
    pub fn failures(&self) -> &[AssertionFailure] {
        &self.failures
    }

    /// Consume the collector
    pub fn into_failures(self) -> Vec<AssertionFailure> {
        self.failures
    }
}

/// Source must be off; destination must match the requested state if any
pub fn check_power(
    f: &mut Findings,
    source: &VmSnapshot,
    dest: &VmSnapshot,
    requested: Option<PowerState>,
) {
    f.equal(
        Check::PowerState,
        PowerState::Off,
        source.power_state,
        "source VM power state after migration",
    );
    if let Some(requested) = requested {
        f.equal(
            Check::PowerState,
            requested,
            dest.power_state,
            "destination VM power state",
        );
    }
}

/// Socket and core counts are preserved
pub fn check_cpu(f: &mut Findings, source: &VmSnapshot, dest: &VmSnapshot) {
    f.equal(Check::Cpu, source.cpu.num_sockets, dest.cpu.num_sockets, "CPU sockets");
    f.equal(Check::Cpu, source.cpu.num_cores, dest.cpu.num_cores, "CPU cores");
}

/// Memory size is preserved
pub fn check_memory(f: &mut Findings, source: &VmSnapshot, dest: &VmSnapshot) {
    f.equal(Check::Memory, source.memory_in_mb, dest.memory_in_mb, "memory (MiB)");
}

/// Every source NIC lands on the network its map entry names
///
/// NICs are paired by MAC address. A source NIC with no map entry is a
/// failure in its own right.
pub fn check_network(f: &mut Findings, map: &[NetworkPair], source: &VmSnapshot, dest: &VmSnapshot) {
    for nic in &source.network_interfaces {
        let network = nic
            .network
            .name
            .as_deref()
            .or(nic.network.id.as_deref())
            .unwrap_or("<unknown>");
        let Some(expected) = get_destination(map, nic) else {
            f.fail(
                Check::Network,
                "a network map entry",
                "none",
                format!("NIC {} on source network {network} is not mapped", nic.name),
            );
            continue;
        };
        let Some(dest_nic) = dest.nic_by_mac(&nic.mac_address) else {
            f.fail(
                Check::Network,
                &nic.mac_address,
                "no matching NIC",
                format!("destination NIC for source NIC {}", nic.name),
            );
            continue;
        };
        f.equal(
            Check::Network,
            expected.as_str(),
            dest_nic.network.name.as_deref().unwrap_or("<none>"),
            format!("network of NIC {}", nic.mac_address),
        );
    }
}

/// Disk count, storage class and, on Ceph RBD, per-disk access mode
pub fn check_storage(
    f: &mut Findings,
    map: &[StoragePair],
    storage_class: &str,
    source: &VmSnapshot,
    dest: &VmSnapshot,
) {
    f.equal(Check::Storage, source.disks.len(), dest.disks.len(), "disk count");

    for disk in &dest.disks {
        f.equal(
            Check::Storage,
            storage_class,
            disk.storage_name.as_str(),
            format!("storage class of disk {}", disk.name),
        );
        if disk.storage_name != CEPH_RBD_STORAGE_CLASS {
            continue;
        }
        let actual = disk.access_modes.first().map(String::as_str).unwrap_or("none");
        let expected_modes = expected_access_modes(map, source, disk);
        if expected_modes.is_empty() {
            f.fail(
                Check::Storage,
                "a storage map entry",
                "none",
                format!("disk {} source storage is not mapped", disk.name),
            );
            continue;
        }
        for expected in expected_modes {
            f.equal(
                Check::Storage,
                expected,
                actual,
                format!("access mode of disk {}", disk.name),
            );
        }
    }
}

/// Every destination disk was imported over the migration network
pub fn check_migration_network(f: &mut Findings, migration_host_ip: &str, dest: &VmSnapshot) {
    for disk in &dest.disks {
        let url = disk.vddk_url.as_deref().unwrap_or("none");
        if !url.contains(migration_host_ip) {
            f.fail(
                Check::MigrationNetwork,
                format!("endpoint on {migration_host_ip}"),
                url,
                format!("import endpoint of disk {}", disk.name),
            );
        }
    }
}

/// Source snapshots recorded before the run are still there
pub fn check_snapshots(f: &mut Findings, before: &[SnapshotInfo], after: &[SnapshotInfo]) {
    if before.len() != after.len() {
        let names = |s: &[SnapshotInfo]| {
            s.iter().map(|i| i.name.as_str()).collect::<Vec<_>>().join(",")
        };
        f.fail(
            Check::Snapshots,
            before.len(),
            after.len(),
            format!(
                "source snapshot count (before [{}], after [{}])",
                names(before),
                names(after)
            ),
        );
    }
}

/// Destination guest agent is reporting
pub fn check_guest_agent(f: &mut Findings, dest: &VmSnapshot) {
    f.equal(
        Check::GuestAgent,
        true,
        dest.guest_agent_running,
        "guest agent running on destination",
    );
}

/// Guest counter output proves writes were copied in order
pub fn check_integrity_output(f: &mut Findings, output: &str, min_entries: usize) {
    if let Err(reason) = parse_integrity_counter(output, min_entries) {
        f.fail(Check::DataIntegrity, "intact counter", reason, "guest data integrity");
    }
}

/// Destination carries the base disk plus every added disk
pub fn check_disk_count(f: &mut Findings, added_disks: usize, dest: &VmSnapshot) {
    f.equal(
        Check::DiskCount,
        1 + added_disks,
        dest.disks.len(),
        "destination disk count",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtv_common::crd::{MapSource, NetworkDestination, StorageDestination};
    use mtv_providers::{Cpu, Disk, NetworkIdentity, Nic};

    fn source_vm() -> VmSnapshot {
        VmSnapshot {
            name: "mtv-rhel8".to_string(),
            power_state: PowerState::Off,
            cpu: Cpu {
                num_sockets: 2,
                num_cores: 2,
            },
            memory_in_mb: 4096,
            disks: vec![Disk {
                name: "Hard disk 1".to_string(),
                storage_name: "ds-fast".to_string(),
                storage_id: Some("datastore-11".to_string()),
                ..Default::default()
            }],
            network_interfaces: vec![Nic {
                name: "Network adapter 1".to_string(),
                mac_address: "00:50:56:AA:BB:01".to_string(),
                network: NetworkIdentity {
                    id: Some("network-7".to_string()),
                    name: Some("VM Network".to_string()),
                },
                ip: None,
            }],
            ..Default::default()
        }
    }

    fn dest_vm() -> VmSnapshot {
        VmSnapshot {
            name: "mtv-rhel8".to_string(),
            power_state: PowerState::On,
            cpu: Cpu {
                num_sockets: 2,
                num_cores: 2,
            },
            memory_in_mb: 4096,
            disks: vec![Disk {
                name: "disk-0".to_string(),
                storage_name: "standard-csi".to_string(),
                access_modes: vec!["ReadWriteOnce".to_string()],
                source_storage: Some("ds-fast".to_string()),
                ..Default::default()
            }],
            network_interfaces: vec![Nic {
                name: "net-0".to_string(),
                mac_address: "00:50:56:aa:bb:01".to_string(),
                network: NetworkIdentity::named("pod"),
                ip: Some("10.0.0.5".to_string()),
            }],
            guest_agent_running: true,
            ..Default::default()
        }
    }

    fn network_map() -> Vec<NetworkPair> {
        vec![NetworkPair {
            source: MapSource::by_id("network-7"),
            destination: NetworkDestination::pod(),
        }]
    }

    mod power {
        use super::*;

        #[test]
        fn source_left_running_fails() {
            let mut source = source_vm();
            source.power_state = PowerState::On;
            let mut f = Findings::new("mtv-rhel8");
            check_power(&mut f, &source, &dest_vm(), None);
            assert_eq!(f.failures().len(), 1);
            assert_eq!(f.failures()[0].expected, "off");
            assert_eq!(f.failures()[0].actual, "on");
        }

        #[test]
        fn requested_destination_state_is_enforced() {
            let mut f = Findings::new("mtv-rhel8");
            check_power(&mut f, &source_vm(), &dest_vm(), Some(PowerState::Off));
            assert_eq!(f.failures().len(), 1);
            assert_eq!(f.failures()[0].message, "destination VM power state");
        }

        #[test]
        fn destination_state_unchecked_without_request() {
            let mut f = Findings::new("mtv-rhel8");
            check_power(&mut f, &source_vm(), &dest_vm(), None);
            assert!(f.failures().is_empty());
        }
    }

    mod compute {
        use super::*;

        #[test]
        fn cpu_and_memory_mismatches_are_all_reported() {
            let mut dest = dest_vm();
            dest.cpu.num_cores = 1;
            dest.memory_in_mb = 2048;
            let mut f = Findings::new("mtv-rhel8");
            check_cpu(&mut f, &source_vm(), &dest);
            check_memory(&mut f, &source_vm(), &dest);
            let checks: Vec<Check> = f.failures().iter().map(|a| a.check).collect();
            assert_eq!(checks, vec![Check::Cpu, Check::Memory]);
        }
    }

    mod network {
        use super::*;

        #[test]
        fn mac_matching_ignores_case() {
            let mut f = Findings::new("mtv-rhel8");
            check_network(&mut f, &network_map(), &source_vm(), &dest_vm());
            assert!(f.failures().is_empty(), "{:?}", f.failures());
        }

        #[test]
        fn unmapped_nic_is_explicit_failure() {
            let mut source = source_vm();
            source.network_interfaces.push(Nic {
                name: "Network adapter 2".to_string(),
                mac_address: "00:50:56:aa:bb:02".to_string(),
                network: NetworkIdentity {
                    id: Some("network-99".to_string()),
                    name: Some("DMZ".to_string()),
                },
                ip: None,
            });
            let mut f = Findings::new("mtv-rhel8");
            check_network(&mut f, &network_map(), &source, &dest_vm());
            assert_eq!(f.failures().len(), 1);
            let failure = &f.failures()[0];
            assert_eq!(failure.check, Check::Network);
            assert!(failure.message.contains("Network adapter 2"));
            assert!(failure.message.contains("DMZ"));
        }

        #[test]
        fn wrong_destination_network_fails() {
            let mut dest = dest_vm();
            dest.network_interfaces[0].network = NetworkIdentity::named("mtv-bridge");
            let mut f = Findings::new("mtv-rhel8");
            check_network(&mut f, &network_map(), &source_vm(), &dest);
            assert_eq!(f.failures()[0].expected, "pod");
            assert_eq!(f.failures()[0].actual, "mtv-bridge");
        }

        #[test]
        fn missing_destination_nic_fails() {
            let mut dest = dest_vm();
            dest.network_interfaces[0].mac_address = "00:50:56:ff:ff:ff".to_string();
            let mut f = Findings::new("mtv-rhel8");
            check_network(&mut f, &network_map(), &source_vm(), &dest);
            assert_eq!(f.failures()[0].actual, "no matching NIC");
        }
    }

    mod storage {
        use super::*;

        fn ceph_pair(id: &str, access_mode: Option<&str>) -> StoragePair {
            StoragePair {
                source: MapSource::by_id(id),
                destination: StorageDestination {
                    storage_class: CEPH_RBD_STORAGE_CLASS.to_string(),
                    access_mode: access_mode.map(str::to_string),
                    volume_mode: None,
                },
                offload_plugin: None,
            }
        }

        #[test]
        fn non_ceph_class_skips_access_mode() {
            let mut f = Findings::new("mtv-rhel8");
            check_storage(&mut f, &[], "standard-csi", &source_vm(), &dest_vm());
            assert!(f.failures().is_empty());
        }

        #[test]
        fn wrong_storage_class_and_count_fail() {
            let mut dest = dest_vm();
            dest.disks.push(dest.disks[0].clone());
            let mut f = Findings::new("mtv-rhel8");
            check_storage(&mut f, &[], "fast-csi", &source_vm(), &dest);
            assert_eq!(f.failures().len(), 3);
            assert_eq!(f.failures()[0].message, "disk count");
        }

        #[test]
        fn ceph_access_mode_follows_mapping_override() {
            let mut source = source_vm();
            source.disks.push(Disk {
                name: "Hard disk 2".to_string(),
                storage_name: "ds-shared".to_string(),
                storage_id: Some("datastore-12".to_string()),
                ..Default::default()
            });
            let mut dest = dest_vm();
            dest.disks = vec![
                Disk {
                    name: "disk-0".to_string(),
                    storage_name: CEPH_RBD_STORAGE_CLASS.to_string(),
                    access_modes: vec!["ReadWriteOnce".to_string()],
                    source_storage: Some("ds-fast".to_string()),
                    ..Default::default()
                },
                Disk {
                    name: "disk-1".to_string(),
                    storage_name: CEPH_RBD_STORAGE_CLASS.to_string(),
                    access_modes: vec!["ReadWriteMany".to_string()],
                    source_storage: Some("ds-shared".to_string()),
                    ..Default::default()
                },
            ];
            let map = vec![
                ceph_pair("datastore-11", Some("ReadWriteOnce")),
                ceph_pair("datastore-12", None),
            ];

            let mut f = Findings::new("mtv-rhel8");
            check_storage(&mut f, &map, CEPH_RBD_STORAGE_CLASS, &source, &dest);
            assert!(f.failures().is_empty(), "{:?}", f.failures());

            dest.disks[1].access_modes = vec!["ReadWriteOnce".to_string()];
            let mut f = Findings::new("mtv-rhel8");
            check_storage(&mut f, &map, CEPH_RBD_STORAGE_CLASS, &source, &dest);
            assert_eq!(f.failures().len(), 1);
            assert_eq!(f.failures()[0].expected, "ReadWriteMany");
            assert!(f.failures()[0].message.contains("disk-1"));
        }

        #[test]
        fn unmapped_ceph_disk_fails() {
            let mut source = source_vm();
            source.disks = vec![Disk {
                name: "Hard disk 1".to_string(),
                storage_name: "ds-orphan".to_string(),
                storage_id: Some("datastore-99".to_string()),
                ..Default::default()
            }];
            let mut dest = dest_vm();
            dest.disks = vec![Disk {
                name: "disk-0".to_string(),
                storage_name: CEPH_RBD_STORAGE_CLASS.to_string(),
                access_modes: vec!["ReadWriteOnce".to_string()],
                source_storage: Some("ds-orphan".to_string()),
                ..Default::default()
            }];
            let map = vec![ceph_pair("datastore-11", Some("ReadWriteOnce"))];

            let mut f = Findings::new("mtv-rhel8");
            check_storage(&mut f, &map, CEPH_RBD_STORAGE_CLASS, &source, &dest);
            assert_eq!(f.failures().len(), 1);
            let failure = &f.failures()[0];
            assert_eq!(failure.check, Check::Storage);
            assert_eq!(failure.actual, "none");
            assert!(failure.message.contains("disk-0"));
        }
    }

    mod extras {
        use super::*;

        fn snapshot(name: &str) -> SnapshotInfo {
            SnapshotInfo {
                name: name.to_string(),
                id: format!("snapshot-{name}"),
                ..Default::default()
            }
        }

        #[test]
        fn lost_snapshot_is_reported_with_names() {
            let mut f = Findings::new("mtv-rhel8");
            check_snapshots(&mut f, &[snapshot("base"), snapshot("pre-upgrade")], &[snapshot("base")]);
            assert_eq!(f.failures().len(), 1);
            assert!(f.failures()[0].message.contains("pre-upgrade"));
        }

        #[test]
        fn stopped_guest_agent_fails() {
            let mut dest = dest_vm();
            dest.guest_agent_running = false;
            let mut f = Findings::new("mtv-rhel8");
            check_guest_agent(&mut f, &dest);
            assert_eq!(f.failures()[0].check, Check::GuestAgent);
        }

        #[test]
        fn disk_count_includes_base_disk() {
            let mut f = Findings::new("mtv-rhel8");
            check_disk_count(&mut f, 0, &dest_vm());
            assert!(f.failures().is_empty());
            check_disk_count(&mut f, 2, &dest_vm());
            assert_eq!(f.failures()[0].expected, "3");
            assert_eq!(f.failures()[0].actual, "1");
        }

        #[test]
        fn disks_must_come_over_the_migration_network() {
            let mut dest = dest_vm();
            dest.disks[0].vddk_url = Some("https://10.6.46.30/sdk".to_string());
            let mut f = Findings::new("mtv-rhel8");
            check_migration_network(&mut f, "10.6.46.30", &dest);
            assert!(f.failures().is_empty());

            dest.disks.push(Disk {
                name: "disk-1".to_string(),
                vddk_url: Some("https://esx-mgmt.example.com/sdk".to_string()),
                ..Default::default()
            });
            dest.disks.push(Disk {
                name: "disk-2".to_string(),
                ..Default::default()
            });
            let mut f = Findings::new("mtv-rhel8");
            check_migration_network(&mut f, "10.6.46.30", &dest);
            assert_eq!(f.failures().len(), 2);
            assert_eq!(f.failures()[0].check, Check::MigrationNetwork);
            assert!(f.failures()[0].message.contains("disk-1"));
            assert_eq!(f.failures()[1].actual, "none");
        }

        #[test]
        fn broken_counter_output_fails_integrity() {
            let mut f = Findings::new("mtv-rhel8");
            check_integrity_output(&mut f, "-1|0|1|5|", 1);
            assert_eq!(f.failures()[0].check, Check::DataIntegrity);
        }
    }
}
