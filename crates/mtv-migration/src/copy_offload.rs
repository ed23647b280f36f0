//! Copy-offload support
//!
//! The storage array credentials live in a Secret referenced by the offload
//! plugin of every StorageMap entry. After the plan is admitted the
//! controller creates a second, plan-scoped secret; migration must not start
//! before it exists.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use mtv_common::config::CopyOffloadConfig;
use mtv_common::crd::ObjectRef;
use mtv_common::{poll_until, Error, Result, CREATED_BY_VALUE, LABEL_CREATED_BY};

use crate::client::MigrationClient;

/// Storage vendors with a copy-offload plugin
pub const SUPPORTED_VENDORS: &[&str] = &["ontap", "vantara"];

const REQUIRED_CREDENTIALS: [(&str, &str); 3] = [
    ("storage_hostname", "STORAGE_HOSTNAME"),
    ("storage_username", "STORAGE_USERNAME"),
    ("storage_password", "STORAGE_PASSWORD"),
];

/// Storage vendor product from the static config
pub fn storage_vendor(config: &CopyOffloadConfig) -> Result<&str> {
    let vendor = config
        .storage_vendor_product
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            Error::validation_for_field(
                "copyoffload",
                "storage_vendor_product",
                format!("required; valid values: {}", SUPPORTED_VENDORS.join(", ")),
            )
        })?;
    if !SUPPORTED_VENDORS.contains(&vendor) {
        return Err(Error::validation_for_field(
            "copyoffload",
            "storage_vendor_product",
            format!(
                "unknown vendor {vendor}; valid values: {}",
                SUPPORTED_VENDORS.join(", ")
            ),
        ));
    }
    Ok(vendor)
}

/// Secret string data with credentials looked up through `env`
pub fn secret_data_with(
    config: &CopyOffloadConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();
    let mut missing = Vec::new();
    for (field, key) in REQUIRED_CREDENTIALS {
        match config.credential_with(field, &env) {
            Some(value) => {
                data.insert(key.to_string(), value);
            }
            None => missing.push(format!("COPYOFFLOAD_{key}")),
        }
    }
    if !missing.is_empty() {
        return Err(Error::validation_for(
            "copyoffload",
            format!(
                "storage credentials are required; set {} or add them to the provider config",
                missing.join(", ")
            ),
        ));
    }

    let vendor = storage_vendor(config)?;
    if vendor == "ontap" {
        if let Some(svm) = config.credential_with("ontap_svm", &env) {
            data.insert("ONTAP_SVM".to_string(), svm);
        }
    }
    Ok(data)
}

/// Storage credentials Secret for the offload plugin
///
/// `COPYOFFLOAD_<FIELD>` environment variables override the static config.
pub fn build_copy_offload_secret(
    config: &CopyOffloadConfig,
    name: &str,
    namespace: &str,
) -> Result<Secret> {
    let data = secret_data_with(config, |key| std::env::var(key).ok())?;
    info!(
        secret = %name,
        %namespace,
        vendor = ?config.storage_vendor_product,
        "Building copy-offload storage secret"
    );
    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_CREATED_BY.to_string(),
                CREATED_BY_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        string_data: Some(data),
        ..Default::default()
    })
}

/// Wait for the controller to create a secret named `<plan>-...`
pub async fn await_plan_secret<C>(
    client: &C,
    plan: &ObjectRef,
    timeout: Duration,
    interval: Duration,
) -> Result<()>
where
    C: MigrationClient + ?Sized,
{
    let prefix = format!("{}-", plan.name);
    let (prefix, namespace) = (prefix.as_str(), plan.namespace.as_str());
    poll_until(
        timeout,
        interval,
        format!("secret with prefix {prefix} in {namespace}"),
        || async move {
            Ok(!client
                .secret_names_with_prefix(prefix, namespace)
                .await?
                .is_empty())
        },
    )
    .await?;
    info!(plan = %plan, "Plan secret is present");
    Ok(())
}
