//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction, condition helpers and polling primitives used by
//! plan submission and the migration poller.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{trace, warn};

use crate::Error;

/// The "Ready" condition type
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Check if a condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Poll until a condition is met or timeout is reached
///
/// Repeatedly calls `check_fn` until it returns `Ok(true)`. Retryable errors
/// from the check are logged and polling continues; any other error is
/// returned as is. On expiry returns [`Error::Timeout`] carrying
/// `timeout_msg`.
///
/// Elapsed time is measured on the tokio clock so paused-time tests expire
/// without real waiting.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = tokio::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout {
                message: timeout_msg,
                timeout_secs: timeout.as_secs(),
            });
        }

        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                trace!("Polling condition not yet met, retrying...");
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Polling check failed, retrying");
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Names of secrets in `namespace` starting with `prefix`
pub async fn secrets_with_prefix(
    client: &Client,
    prefix: &str,
    namespace: &str,
) -> Result<Vec<String>, Error> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let list = secrets.list(&ListParams::default()).await?;
    Ok(list
        .items
        .into_iter()
        .filter_map(|s| s.metadata.name)
        .filter(|name| name.starts_with(prefix))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Cond {
        t: &'static str,
        s: &'static str,
    }

    impl HasConditionFields for Cond {
        fn type_field(&self) -> &str {
            self.t
        }
        fn status_field(&self) -> &str {
            self.s
        }
    }

    #[test]
    fn has_condition_requires_true_status() {
        let conds = [Cond { t: "Ready", s: "False" }, Cond { t: "Executing", s: "True" }];
        assert!(!has_condition(Some(&conds[..]), CONDITION_READY));
        assert!(has_condition(Some(&conds[..]), "Executing"));
        assert!(!has_condition::<Cond>(None, CONDITION_READY));
    }

    #[test]
    fn has_condition_is_case_sensitive_on_status() {
        let conds = [Cond { t: "Ready", s: "true" }];
        assert!(!has_condition(Some(&conds[..]), CONDITION_READY));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_returns_once_condition_met() {
        let calls = AtomicUsize::new(0);
        let result = poll_until(Duration::from_secs(30), Duration::from_secs(1), "never", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 2) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_times_out_with_message() {
        let result = poll_until(
            Duration::from_secs(5),
            Duration::from_secs(1),
            "waiting for plan",
            || async { Ok(false) },
        )
        .await;
        match result {
            Err(Error::Timeout {
                message,
                timeout_secs,
            }) => {
                assert_eq!(message, "waiting for plan");
                assert_eq!(timeout_secs, 5);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_keeps_polling_through_errors() {
        let calls = AtomicUsize::new(0);
        let result = poll_until(Duration::from_secs(30), Duration::from_secs(1), "x", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::internal("transient"))
                } else {
                    Ok(true)
                }
            }
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_returns_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let result = poll_until(Duration::from_secs(30), Duration::from_secs(1), "x", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<bool, _>(Error::validation("forbidden")) }
        })
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
