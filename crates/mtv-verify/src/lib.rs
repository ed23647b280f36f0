//! Post-migration verification
//!
//! Compares each migrated VM against its source and collects every
//! discrepancy as an [`AssertionFailure`] instead of stopping at the first.

#![deny(missing_docs)]

pub mod checks;
pub mod integrity;
pub mod resolve;
pub mod verifier;

pub use integrity::{parse_integrity_counter, IntegrityRunner, PodIntegrityRunner};
pub use resolve::get_destination;
pub use verifier::{verify, verify_vm_disk_count, VerifyContext, VerifyPlan, VmExpectation};

use std::fmt;

/// Property compared by a check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Check {
    /// Reading either side of the VM failed
    Read,
    /// Source powered off, destination in the requested state
    PowerState,
    /// Socket and core counts
    Cpu,
    /// Memory size
    Memory,
    /// NIC placement by MAC
    Network,
    /// Disk count, storage class and access mode
    Storage,
    /// Disks imported through the source host's migration network
    MigrationNetwork,
    /// Source snapshots unchanged
    Snapshots,
    /// Guest agent reporting on the destination
    GuestAgent,
    /// Guest counter written during warm pre-copies
    DataIntegrity,
    /// No user power-off recorded on the source
    PowerOffEvent,
    /// Destination disk count after added disks
    DiskCount,
}

impl Check {
    /// Stable lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::PowerState => "power_state",
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::MigrationNetwork => "migration_network",
            Self::Snapshots => "snapshots",
            Self::GuestAgent => "guest_agent",
            Self::DataIntegrity => "data_integrity",
            Self::PowerOffEvent => "power_off_event",
            Self::DiskCount => "disk_count",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed comparison
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertionFailure {
    /// VM name
    pub vm: String,
    /// Check that failed
    pub check: Check,
    /// Expected value
    pub expected: String,
    /// Observed value
    pub actual: String,
    /// What was compared
    pub message: String,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} (expected {}, got {})",
            self.vm, self.check, self.message, self.expected, self.actual
        )
    }
}
