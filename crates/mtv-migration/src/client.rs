//! Control-plane operations used by submission, polling and classification
//!
//! Everything goes through [`MigrationClient`] so the state machines can be
//! driven by mocks in tests. Reads always hit the API server; nothing here
//! caches cluster state.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use mtv_common::crd::{Hook, Migration, NetworkMap, Plan, Provider, StorageMap};
use mtv_common::kube_utils::secrets_with_prefix;
use mtv_common::Result;

/// Forklift resource operations against the target cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MigrationClient: Send + Sync {
    /// Create a NetworkMap, returning the stored object
    async fn create_network_map(&self, map: &NetworkMap) -> Result<NetworkMap>;

    /// Create a StorageMap, returning the stored object
    async fn create_storage_map(&self, map: &StorageMap) -> Result<StorageMap>;

    /// Create a Hook
    async fn create_hook(&self, hook: &Hook) -> Result<Hook>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Create a Plan, returning the stored object
    async fn create_plan(&self, plan: &Plan) -> Result<Plan>;

    /// Fetch a Plan, `None` when absent
    async fn get_plan(&self, name: &str, namespace: &str) -> Result<Option<Plan>>;

    /// Fetch a Provider, `None` when absent
    async fn get_provider(&self, name: &str, namespace: &str) -> Result<Option<Provider>>;

    /// Create a Migration, returning the stored object
    async fn create_migration(&self, migration: &Migration) -> Result<Migration>;

    /// All Migrations in a namespace
    async fn list_migrations(&self, namespace: &str) -> Result<Vec<Migration>>;

    /// Names of Secrets in `namespace` starting with `prefix`
    async fn secret_names_with_prefix(&self, prefix: &str, namespace: &str) -> Result<Vec<String>>;
}

/// [`MigrationClient`] backed by a kube [`Client`]
#[derive(Clone)]
pub struct KubeMigrationClient {
    client: Client,
}

impl KubeMigrationClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying kube client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of<K: kube::Resource>(obj: &K) -> &str {
    obj.meta().namespace.as_deref().unwrap_or("default")
}

#[async_trait]
impl MigrationClient for KubeMigrationClient {
    async fn create_network_map(&self, map: &NetworkMap) -> Result<NetworkMap> {
        debug!(name = ?map.metadata.name, "Creating NetworkMap");
        Ok(self
            .api::<NetworkMap>(namespace_of(map))
            .create(&PostParams::default(), map)
            .await?)
    }

    async fn create_storage_map(&self, map: &StorageMap) -> Result<StorageMap> {
        debug!(name = ?map.metadata.name, "Creating StorageMap");
        Ok(self
            .api::<StorageMap>(namespace_of(map))
            .create(&PostParams::default(), map)
            .await?)
    }

    async fn create_hook(&self, hook: &Hook) -> Result<Hook> {
        debug!(name = ?hook.metadata.name, "Creating Hook");
        Ok(self
            .api::<Hook>(namespace_of(hook))
            .create(&PostParams::default(), hook)
            .await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        debug!(name = ?secret.metadata.name, "Creating Secret");
        Ok(self
            .api::<Secret>(namespace_of(secret))
            .create(&PostParams::default(), secret)
            .await?)
    }

    async fn create_plan(&self, plan: &Plan) -> Result<Plan> {
        debug!(name = ?plan.metadata.name, "Creating Plan");
        Ok(self
            .api::<Plan>(namespace_of(plan))
            .create(&PostParams::default(), plan)
            .await?)
    }

    async fn get_plan(&self, name: &str, namespace: &str) -> Result<Option<Plan>> {
        Ok(self.api::<Plan>(namespace).get_opt(name).await?)
    }

    async fn get_provider(&self, name: &str, namespace: &str) -> Result<Option<Provider>> {
        Ok(self.api::<Provider>(namespace).get_opt(name).await?)
    }

    async fn create_migration(&self, migration: &Migration) -> Result<Migration> {
        debug!(name = ?migration.metadata.name, "Creating Migration");
        Ok(self
            .api::<Migration>(namespace_of(migration))
            .create(&PostParams::default(), migration)
            .await?)
    }

    async fn list_migrations(&self, namespace: &str) -> Result<Vec<Migration>> {
        Ok(self
            .api::<Migration>(namespace)
            .list(&ListParams::default())
            .await?
            .items)
    }

    async fn secret_names_with_prefix(&self, prefix: &str, namespace: &str) -> Result<Vec<String>> {
        secrets_with_prefix(&self.client, prefix, namespace).await
    }
}
