//! Guest data-integrity check
//!
//! A runner pod logs into the migrated guest and prints the counter file a
//! writer kept appending to during warm pre-copies. The output looks like
//! `...-1|1|2|3`; every entry after the `-1` marker must equal its index.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, LogParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};
use uuid::Uuid;

use mtv_common::{poll_until, Result, CREATED_BY_VALUE, LABEL_CREATED_BY};

const COUNTER_MARKER: &str = "-1";
const POD_PHASE_SUCCEEDED: &str = "Succeeded";
const POD_PHASE_FAILED: &str = "Failed";

/// Reads the guest counter output from a migrated VM
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IntegrityRunner: Send + Sync {
    /// Raw counter output read from the guest at `ip`
    async fn read_counter(&self, ip: &str, username: &str, password: &str) -> Result<String>;
}

/// Check counter output, returning the number of entries
///
/// Fails when the marker is missing, an entry is out of sequence, or fewer
/// than `min_entries` entries were written. A trailing separator is ignored.
pub fn parse_integrity_counter(output: &str, min_entries: usize) -> std::result::Result<usize, String> {
    let Some((_, tail)) = output.split_once(COUNTER_MARKER) else {
        return Err(format!("counter marker {COUNTER_MARKER:?} not found in output"));
    };
    let tail = tail.trim().trim_end_matches('|');
    let mut tokens = tail.split('|').map(str::trim);
    if let Some(head) = tokens.next().filter(|head| !head.is_empty()) {
        return Err(format!("counter marker followed by {head:?}"));
    }
    let entries: Vec<&str> = tokens.collect();

    for (i, entry) in entries.iter().enumerate() {
        let expected = (i + 1).to_string();
        if *entry != expected {
            return Err(format!("entry {} is {entry:?}, expected {expected:?}", i + 1));
        }
    }
    if entries.len() < min_entries {
        return Err(format!(
            "{} entries written, expected at least {min_entries}",
            entries.len()
        ));
    }
    Ok(entries.len())
}

/// Runs the counter check as a short-lived pod in the target namespace
pub struct PodIntegrityRunner {
    client: Client,
    namespace: String,
    image: String,
    timeout: Duration,
    interval: Duration,
}

impl PodIntegrityRunner {
    /// Runner creating pods from `image` in `namespace`
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        image: impl Into<String>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            image: image.into(),
            timeout,
            interval,
        }
    }

    fn pod(&self, name: &str, ip: &str, username: &str, password: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(
                    [(LABEL_CREATED_BY.to_string(), CREATED_BY_VALUE.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: "runner".to_string(),
                    image: Some(self.image.clone()),
                    command: Some(vec![
                        "python".to_string(),
                        "./main.py".to_string(),
                        format!("--ip={ip}"),
                        format!("--username={username}"),
                        format!("--password={password}"),
                    ]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn run(&self, pods: &Api<Pod>, name: &str) -> Result<String> {
        poll_until(
            self.timeout,
            self.interval,
            format!("integrity pod {name} did not finish"),
            || async move {
                let phase = pods
                    .get_opt(name)
                    .await?
                    .and_then(|p| p.status)
                    .and_then(|s| s.phase);
                Ok(matches!(
                    phase.as_deref(),
                    Some(POD_PHASE_SUCCEEDED) | Some(POD_PHASE_FAILED)
                ))
            },
        )
        .await?;
        Ok(pods.logs(name, &LogParams::default()).await?)
    }
}

#[async_trait]
impl IntegrityRunner for PodIntegrityRunner {
    async fn read_counter(&self, ip: &str, username: &str, password: &str) -> Result<String> {
        let uuid = Uuid::new_v4().simple().to_string();
        let name = format!("worker-{}", &uuid[..5]);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);

        debug!(pod = %name, ip = %ip, "Starting integrity check");
        pods.create(&PostParams::default(), &self.pod(&name, ip, username, password))
            .await?;

        let output = self.run(&pods, &name).await;
        if let Err(e) = pods.delete(&name, &DeleteParams::default()).await {
            warn!(pod = %name, error = %e, "Failed to delete integrity pod");
        }
        output
    }
}
