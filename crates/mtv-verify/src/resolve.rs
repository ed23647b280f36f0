//! Mapping resolution for the network and storage checks
//!
//! A source NIC resolves to the first NetworkMap entry whose source matches
//! it. Entries with a `type` (OpenShift sources) match on the network type
//! or on the attachment name; all others match on id or name.

use mtv_common::crd::{NetworkPair, StoragePair};
use mtv_providers::{Disk, Nic, VmSnapshot};

/// Access mode expected when a mapping carries an explicit override
pub const ACCESS_MODE_RWO: &str = "ReadWriteOnce";
/// Access mode expected otherwise
pub const ACCESS_MODE_RWX: &str = "ReadWriteMany";

/// Destination network name the map sends `nic` to
///
/// Pod destinations resolve to `"pod"`, multus destinations to the
/// attachment name. `None` when no entry matches.
pub fn get_destination(map: &[NetworkPair], nic: &Nic) -> Option<String> {
    let network_name = nic.network.name.as_deref();
    let network_id = nic.network.id.as_deref();

    map.iter()
        .find(|pair| {
            let source = &pair.source;
            match source.type_.as_deref() {
                Some(type_) => {
                    network_name == Some(type_)
                        || source
                            .name
                            .as_deref()
                            .and_then(|n| n.rsplit('/').next())
                            .is_some_and(|n| network_name == Some(n))
                }
                None => {
                    (source.id.is_some() && source.id.as_deref() == network_id)
                        || (source.name.is_some() && source.name.as_deref() == network_name)
                }
            }
        })
        .map(|pair| {
            if pair.destination.is_pod() {
                mtv_common::crd::NETWORK_TYPE_POD.to_string()
            } else {
                pair.destination.name.clone().unwrap_or_default()
            }
        })
}

fn pair_matches(pair: &StoragePair, key: &str) -> bool {
    pair.source.id.as_deref() == Some(key) || pair.source.name.as_deref() == Some(key)
}

fn expected_mode(pair: &StoragePair) -> &'static str {
    if pair
        .destination
        .access_mode
        .as_deref()
        .is_some_and(|m| !m.is_empty())
    {
        ACCESS_MODE_RWO
    } else {
        ACCESS_MODE_RWX
    }
}

fn source_keys(disk: &Disk) -> impl Iterator<Item = &str> {
    std::iter::once(disk.storage_name.as_str())
        .chain(disk.storage_id.as_deref())
        .filter(|k| !k.is_empty())
}

/// Access modes a destination disk is expected to have
///
/// When the disk records which source datastore it came from, only the
/// mapping entry for that datastore applies. Otherwise every entry matching
/// any of the source VM's storages applies.
pub fn expected_access_modes(
    map: &[StoragePair],
    source_vm: &VmSnapshot,
    dest_disk: &Disk,
) -> Vec<&'static str> {
    let keys: Vec<&str> = match dest_disk.source_storage.as_deref() {
        Some(origin) => std::iter::once(origin)
            .chain(
                source_vm
                    .disks
                    .iter()
                    .filter(|d| d.storage_name == origin)
                    .filter_map(|d| d.storage_id.as_deref()),
            )
            .collect(),
        None => source_vm.disks.iter().flat_map(source_keys).collect(),
    };

    let mut modes = Vec::new();
    for pair in map {
        if keys.iter().any(|k| pair_matches(pair, k)) {
            let mode = expected_mode(pair);
            if !modes.contains(&mode) {
                modes.push(mode);
            }
        }
    }
    modes
}
