//! Harness configuration
//!
//! Loaded from a YAML file. Every field has a default so a minimal file only
//! names the source provider and target storage class.
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. `kubeconfig` in the config file
//! 2. `MTV_KUBECONFIG` environment variable
//! 3. Fall back to kube default (`KUBECONFIG` env / `~/.kube/config`)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crd::ProviderType;
use crate::{Error, Result};

const MTV_KUBECONFIG_ENV: &str = "MTV_KUBECONFIG";
/// Prefix for environment overrides of copy-offload credentials
pub const COPYOFFLOAD_ENV_PREFIX: &str = "COPYOFFLOAD_";

/// Default image for the data-integrity runner pod
pub const DEFAULT_RUNNER_IMAGE: &str = "quay.io/mtvqe/python-runner";
/// Storage class that gets per-disk access-mode verification
pub const CEPH_RBD_STORAGE_CLASS: &str = "ocs-storagecluster-ceph-rbd";

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Optional kubeconfig path for the target cluster
    pub kubeconfig: Option<String>,
    /// Namespace where MTV is installed and providers live
    pub mtv_namespace: String,
    /// Namespace migrated VMs are created in
    pub target_namespace: String,
    /// Storage class every migrated disk must land on
    pub storage_class: String,
    /// NetworkAttachmentDefinition used for secondary networks
    pub multus_network_name: String,
    /// Map every source network to the pod network
    pub pod_network_only: bool,
    /// Deadline for a migration to reach a terminal state
    pub plan_wait_timeout_secs: u64,
    /// Deadline for a plan to become Ready
    pub plan_ready_timeout_secs: u64,
    /// Deadline for the plan-scoped copy-offload secret
    pub plan_secret_timeout_secs: u64,
    /// Interval between migration status samples
    pub poll_interval_secs: u64,
    /// Run post-migration verification
    pub check_vms_signals: bool,
    /// Image used by the data-integrity runner pod
    pub runner_image: String,
    /// Source provider connection details
    pub source_provider: SourceProviderConfig,
    /// Hook definitions created before plans that reference them
    pub hooks: HooksConfig,
    /// Forklift inventory route (`https://forklift-inventory-openshift-mtv.apps...`)
    pub inventory_url: Option<String>,
    /// Bearer token for the inventory route
    pub inventory_token: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            mtv_namespace: "openshift-mtv".to_string(),
            target_namespace: "mtv-api-tests".to_string(),
            storage_class: String::new(),
            multus_network_name: String::new(),
            pod_network_only: false,
            plan_wait_timeout_secs: 600,
            plan_ready_timeout_secs: 360,
            plan_secret_timeout_secs: 120,
            poll_interval_secs: 1,
            check_vms_signals: true,
            runner_image: DEFAULT_RUNNER_IMAGE.to_string(),
            source_provider: SourceProviderConfig::default(),
            hooks: HooksConfig::default(),
            inventory_url: None,
            inventory_token: None,
        }
    }
}

impl HarnessConfig {
    /// Parse configuration from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context(
                "config",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_yaml_str(&data)
    }

    /// Reject configurations that cannot drive a scenario
    pub fn validate(&self) -> Result<()> {
        if self.target_namespace.is_empty() {
            return Err(Error::validation_for_field(
                "config",
                "target_namespace",
                "must not be empty",
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::validation_for_field(
                "config",
                "poll_interval_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Migration completion deadline
    pub fn plan_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.plan_wait_timeout_secs)
    }

    /// Plan admission deadline
    pub fn plan_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.plan_ready_timeout_secs)
    }

    /// Plan secret deadline
    pub fn plan_secret_timeout(&self) -> Duration {
        Duration::from_secs(self.plan_secret_timeout_secs)
    }

    /// Status sampling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Resolve the kubeconfig path; `None` means use kube defaults
    pub fn resolve_kubeconfig(&self) -> Option<String> {
        if let Some(path) = &self.kubeconfig {
            return Some(path.clone());
        }
        match std::env::var(MTV_KUBECONFIG_ENV) {
            Ok(path) if !path.is_empty() => Some(path),
            _ => None,
        }
    }
}

/// Source provider connection record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceProviderConfig {
    /// Provider type
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// Provider version, informational
    pub version: String,
    /// Hostname of the provider API
    pub fqdn: String,
    /// Full API URL
    pub api_url: String,
    /// API username
    pub username: String,
    /// API password
    pub password: String,
    /// Skip TLS verification against the provider
    pub insecure: bool,
    /// OpenStack project
    pub project_name: Option<String>,
    /// OpenStack user domain
    pub user_domain_name: Option<String>,
    /// OpenStack project domain
    pub project_domain_name: Option<String>,
    /// OpenStack region
    pub region_name: Option<String>,
    /// Linux guest credentials
    pub guest_vm_linux_user: Option<String>,
    /// Linux guest password
    pub guest_vm_linux_password: Option<String>,
    /// Windows guest credentials
    pub guest_vm_win_user: Option<String>,
    /// Windows guest password
    pub guest_vm_win_password: Option<String>,
    /// Copy-offload settings (vSphere only)
    pub copyoffload: Option<CopyOffloadConfig>,
    /// ESXi hosts with a dedicated migration network (vSphere only)
    pub host_list: Vec<ProviderHost>,
}

/// Source host reached over a dedicated migration network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderHost {
    /// Inventory id of the host
    pub migration_host_id: String,
    /// Address of the host on the migration network
    pub migration_host_ip: String,
}

impl SourceProviderConfig {
    /// Guest OS credentials for a Linux or Windows guest
    pub fn guest_credentials(&self, win_os: bool) -> Option<(String, String)> {
        let (user, password) = if win_os {
            (&self.guest_vm_win_user, &self.guest_vm_win_password)
        } else {
            (&self.guest_vm_linux_user, &self.guest_vm_linux_password)
        };
        Some((user.clone()?, password.clone()?))
    }

    /// Migration network address of the first configured host
    pub fn migration_host_ip(&self) -> Option<&str> {
        self.host_list
            .first()
            .map(|h| h.migration_host_ip.as_str())
            .filter(|ip| !ip.is_empty())
    }
}

/// Copy-offload storage array settings
///
/// Credential fields may be overridden by `COPYOFFLOAD_<FIELD>` environment
/// variables, e.g. `COPYOFFLOAD_STORAGE_PASSWORD`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOffloadConfig {
    /// Storage vendor product (ontap, vantara)
    pub storage_vendor_product: Option<String>,
    /// Storage array management hostname
    pub storage_hostname: Option<String>,
    /// Storage array username
    pub storage_username: Option<String>,
    /// Storage array password
    pub storage_password: Option<String>,
    /// NetApp SVM name
    pub ontap_svm: Option<String>,
    /// Primary datastore inventory id
    pub datastore_id: Option<String>,
    /// Secondary datastore inventory id
    pub secondary_datastore_id: Option<String>,
}

impl CopyOffloadConfig {
    /// Credential value with environment override applied
    pub fn credential(&self, field: &str) -> Option<String> {
        self.credential_with(field, |key| std::env::var(key).ok())
    }

    /// Credential value with a caller-supplied environment lookup
    pub fn credential_with(
        &self,
        field: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        let key = format!("{}{}", COPYOFFLOAD_ENV_PREFIX, field.to_uppercase());
        if let Some(value) = env(&key).filter(|v| !v.is_empty()) {
            return Some(value);
        }
        self.static_value(field)
    }

    fn static_value(&self, field: &str) -> Option<String> {
        let value = match field {
            "storage_vendor_product" => &self.storage_vendor_product,
            "storage_hostname" => &self.storage_hostname,
            "storage_username" => &self.storage_username,
            "storage_password" => &self.storage_password,
            "ontap_svm" => &self.ontap_svm,
            "datastore_id" => &self.datastore_id,
            "secondary_datastore_id" => &self.secondary_datastore_id,
            _ => return None,
        };
        value.clone().filter(|v| !v.is_empty())
    }
}

/// Hook definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Hook bound to PreHook
    pub prehook: Option<HookConfig>,
    /// Hook bound to PostHook
    pub posthook: Option<HookConfig>,
}

/// One hook definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Hook resource name
    pub name: String,
    /// Base64-encoded playbook
    pub payload: String,
    /// Runner image override
    pub image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn minimal_yaml_gets_defaults() {
        let cfg = HarnessConfig::from_yaml_str(
            r#"
storage_class: ocs-storagecluster-ceph-rbd
source_provider:
  type: vsphere
  api_url: https://vcenter.example.com
  username: admin
  password: secret
"#,
        )
        .unwrap();
        assert_eq!(cfg.mtv_namespace, "openshift-mtv");
        assert_eq!(cfg.plan_wait_timeout(), Duration::from_secs(600));
        assert_eq!(cfg.plan_ready_timeout(), Duration::from_secs(360));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
        assert!(cfg.check_vms_signals);
        assert_eq!(cfg.runner_image, DEFAULT_RUNNER_IMAGE);
        assert_eq!(cfg.source_provider.provider_type, ProviderType::Vsphere);
    }

    #[test]
    fn rhv_type_is_accepted() {
        let cfg = HarnessConfig::from_yaml_str("source_provider:\n  type: rhv\n").unwrap();
        assert_eq!(cfg.source_provider.provider_type, ProviderType::Ovirt);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = HarnessConfig::from_yaml_str("poll_interval_secs: 0\n").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn malformed_yaml_is_serialization_error() {
        let err = HarnessConfig::from_yaml_str("plan_wait_timeout_secs: [").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mtv.yaml");
        std::fs::write(&path, "target_namespace: scale-tests\nplan_wait_timeout_secs: 3600\n")
            .unwrap();
        let cfg = HarnessConfig::load(&path).unwrap();
        assert_eq!(cfg.target_namespace, "scale-tests");
        assert_eq!(cfg.plan_wait_timeout_secs, 3600);
    }

    #[test]
    fn explicit_kubeconfig_wins() {
        let cfg = HarnessConfig {
            kubeconfig: Some("/tmp/kc".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_kubeconfig().as_deref(), Some("/tmp/kc"));
    }

    mod copy_offload {
        use super::*;

        fn config() -> CopyOffloadConfig {
            CopyOffloadConfig {
                storage_vendor_product: Some("ontap".to_string()),
                storage_hostname: Some("array.example.com".to_string()),
                storage_password: Some("from-file".to_string()),
                ..Default::default()
            }
        }

        #[test]
        fn env_overrides_static_value() {
            let env: HashMap<&str, &str> =
                HashMap::from([("COPYOFFLOAD_STORAGE_PASSWORD", "from-env")]);
            let value = config()
                .credential_with("storage_password", |k| env.get(k).map(|v| v.to_string()));
            assert_eq!(value.as_deref(), Some("from-env"));
        }

        #[test]
        fn empty_env_falls_back_to_static() {
            let value = config().credential_with("storage_hostname", |_| Some(String::new()));
            assert_eq!(value.as_deref(), Some("array.example.com"));
        }

        #[test]
        fn missing_everywhere_is_none() {
            assert!(config().credential_with("storage_username", |_| None).is_none());
            assert!(config().credential_with("unknown_field", |_| None).is_none());
        }
    }

    #[test]
    fn guest_credentials_pick_os_family() {
        let src = SourceProviderConfig {
            guest_vm_linux_user: Some("root".into()),
            guest_vm_linux_password: Some("lin".into()),
            guest_vm_win_user: Some("Administrator".into()),
            guest_vm_win_password: Some("win".into()),
            ..Default::default()
        };
        assert_eq!(src.guest_credentials(false), Some(("root".into(), "lin".into())));
        assert_eq!(
            src.guest_credentials(true),
            Some(("Administrator".into(), "win".into()))
        );
        assert_eq!(SourceProviderConfig::default().guest_credentials(false), None);
    }

    #[test]
    fn migration_host_comes_from_first_host() {
        let config = HarnessConfig::from_yaml_str(
            r#"
source_provider:
  type: vsphere
  host_list:
    - migration_host_id: host-21
      migration_host_ip: 10.6.46.30
    - migration_host_id: host-22
      migration_host_ip: 10.6.46.31
"#,
        )
        .unwrap();
        assert_eq!(config.source_provider.migration_host_ip(), Some("10.6.46.30"));
        assert_eq!(SourceProviderConfig::default().migration_host_ip(), None);
    }
}
