//! Capability interface shared by every provider
//!
//! Each provider implements [`ProviderAdapter`] independently; the only
//! thing they share is the [`VmSnapshot`] they produce.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use tracing::{error, info};

use mtv_common::crd::ProviderType;
use mtv_common::{Error, Result};

use crate::snapshot::{VmHandle, VmSnapshot};

/// Operations every provider offers
///
/// `connect` is reentrant: calling it on a live session only checks it,
/// and a stale session is replaced transparently. Callers that connected
/// must call `disconnect` on every exit path.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider type
    fn provider_type(&self) -> ProviderType;

    /// Open or refresh the API session
    async fn connect(&self) -> Result<()>;

    /// Close the API session; safe to call when not connected
    async fn disconnect(&self) -> Result<()>;

    /// Enumerate VMs whose name matches `query` (case-insensitive regex)
    ///
    /// Fails with `NoVmsFound` when nothing is listed or nothing matches,
    /// and with `VmBadDatastore` / `VmMissingDescriptor` when any matching
    /// VM is unhealthy.
    async fn list_vms(&self, query: Option<String>) -> Result<Vec<VmHandle>>;

    /// Read a VM by name
    async fn snapshot(&self, vm_name: &str, namespace: Option<String>) -> Result<VmSnapshot>;

    /// Power on; no-op when already running
    async fn start(&self, vm: &VmHandle) -> Result<()>;

    /// Power off; no-op when already off
    async fn stop(&self, vm: &VmHandle) -> Result<()>;

    /// Clone `source_name` into a new powered-off VM
    async fn clone_vm(&self, source_name: &str, new_name: &str) -> Result<VmHandle>;

    /// Whether the provider recorded a user-initiated power-off of `vm`
    ///
    /// Providers without an event log report `false`.
    async fn power_off_event_recorded(&self, vm: &VmHandle) -> Result<bool>;
}

/// Health screen result for one listed VM
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmHealth {
    /// Usable
    Healthy,
    /// Backing datastore is inaccessible
    BadDatastore,
    /// Descriptor (.vmx) file is missing
    MissingDescriptor,
}

/// One VM as listed by a provider, before screening
#[derive(Clone, Debug, PartialEq)]
pub struct VmListing {
    /// VM handle
    pub handle: VmHandle,
    /// Health screen result
    pub health: VmHealth,
}

impl VmListing {
    /// A listed VM that passed the health screen
    pub fn healthy(handle: VmHandle) -> Self {
        Self {
            handle,
            health: VmHealth::Healthy,
        }
    }
}

/// Compile a name query the way every adapter matches it
pub fn compile_query(query: &str) -> Result<Regex> {
    RegexBuilder::new(query)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::validation_for_field("list_vms", "query", e.to_string()))
}

/// Filter a listing by query and apply the batch health gate
///
/// If any matching VM is unhealthy the whole call fails; a partial VM set
/// is never returned. Every unhealthy VM is logged before the first one is
/// reported.
pub fn screen_listing(
    provider: ProviderType,
    query: Option<&str>,
    listing: Vec<VmListing>,
) -> Result<Vec<VmListing>> {
    if listing.is_empty() {
        return Err(Error::NoVmsFound {
            provider: provider.to_string(),
            query: None,
        });
    }

    let matched: Vec<VmListing> = match query {
        Some(q) => {
            let pattern = compile_query(q)?;
            listing
                .into_iter()
                .filter(|l| pattern.is_match(&l.handle.name))
                .collect()
        }
        None => listing,
    };

    if matched.is_empty() {
        return Err(Error::NoVmsFound {
            provider: provider.to_string(),
            query: query.map(str::to_string),
        });
    }

    let mut first_failure = None;
    for vm in &matched {
        let failure = match vm.health {
            VmHealth::Healthy => continue,
            VmHealth::BadDatastore => {
                error!(vm = %vm.handle.name, %provider, "VM is inaccessible due to datastore error");
                Error::VmBadDatastore {
                    vm: vm.handle.name.clone(),
                }
            }
            VmHealth::MissingDescriptor => {
                error!(vm = %vm.handle.name, %provider, "VM is missing its descriptor file");
                Error::VmMissingDescriptor {
                    vm: vm.handle.name.clone(),
                }
            }
        };
        first_failure.get_or_insert(failure);
    }

    match first_failure {
        Some(err) => Err(err),
        None => Ok(matched),
    }
}

/// Session token shared across calls on one adapter
#[derive(Debug, Default)]
pub struct SessionCell {
    token: RwLock<Option<String>>,
}

impl SessionCell {
    /// Current token, if connected
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Replace the token
    pub fn set(&self, token: String) {
        *self.token.write() = Some(token);
    }

    /// Drop and return the token
    pub fn take(&self) -> Option<String> {
        self.token.write().take()
    }
}

/// Return a live session token, logging in again when the liveness check fails
///
/// `alive` errors are treated as a dead session.
pub async fn ensure_session<P, PF, L, LF>(
    cell: &SessionCell,
    provider: ProviderType,
    alive: P,
    login: L,
) -> Result<String>
where
    P: FnOnce(String) -> PF,
    PF: std::future::Future<Output = Result<bool>>,
    L: FnOnce() -> LF,
    LF: std::future::Future<Output = Result<String>>,
{
    if let Some(token) = cell.token() {
        if alive(token.clone()).await.unwrap_or(false) {
            return Ok(token);
        }
        info!(%provider, "Session is stale, reconnecting");
    }
    let token = login().await?;
    cell.set(token.clone());
    Ok(token)
}
