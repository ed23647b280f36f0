//! Error types for migration scenarios
//!
//! Each variant names the resource it is about (plan, migration, VM) so a
//! failed scenario reports what was being looked at, not just what broke.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for migration scenario operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// HTTP error talking to a hypervisor or inventory API
    #[error("http error: {source}")]
    Http {
        /// The underlying reqwest error
        #[from]
        source: reqwest::Error,
    },

    /// Provider enumeration returned no VMs
    #[error("no VMs found on {provider}{}", query_suffix(.query))]
    NoVmsFound {
        /// Provider type that was enumerated
        provider: String,
        /// Name filter that matched nothing, if one was given
        query: Option<String>,
    },

    /// VM is known to the provider but absent by name or id
    #[error("VM {vm} not found on {provider}")]
    VmNotFound {
        /// VM name or id that was looked up
        vm: String,
        /// Provider type that was searched
        provider: String,
    },

    /// VM failed the health screen because its descriptor file is missing
    #[error("VM {vm} is missing its descriptor file")]
    VmMissingDescriptor {
        /// Name of the unhealthy VM
        vm: String,
    },

    /// VM failed the health screen because its datastore is inaccessible
    #[error("VM {vm} is backed by an inaccessible datastore")]
    VmBadDatastore {
        /// Name of the unhealthy VM
        vm: String,
    },

    /// Plan never reached Ready=True
    #[error("plan {namespace}/{plan} not ready after {timeout_secs}s")]
    PlanNotReady {
        /// Plan name
        plan: String,
        /// Plan namespace
        namespace: String,
        /// How long we waited
        timeout_secs: u64,
    },

    /// A polled condition or object did not appear in time
    #[error("timed out after {timeout_secs}s: {message}")]
    Timeout {
        /// Description of what we were waiting for
        message: String,
        /// How long we waited
        timeout_secs: u64,
    },

    /// Migration stayed Executing past the deadline
    #[error("migration for plan {plan} still executing after {timeout_secs}s")]
    MigrationTimeout {
        /// Plan name
        plan: String,
        /// How long we waited
        timeout_secs: u64,
    },

    /// Migration reached the terminal Failed state
    #[error("migration for plan {plan} failed; last status: {status}")]
    MigrationFailed {
        /// Plan name
        plan: String,
        /// Last observed status payload, serialized
        status: String,
    },

    /// Migration completed when the scenario expected it to fail
    #[error("migration for plan {plan} succeeded but was expected to fail")]
    UnexpectedSuccess {
        /// Plan name
        plan: String,
    },

    /// Post-migration checks recorded failures
    #[error("post-migration verification of plan {plan} failed {count} check(s):\n{details}")]
    VerificationFailed {
        /// Plan name
        plan: String,
        /// Number of failed checks
        count: usize,
        /// One line per failure
        details: String,
    },

    /// No Migration CR references the plan
    #[error("no migration found for plan {namespace}/{plan}")]
    MigrationNotFound {
        /// Plan name
        plan: String,
        /// Plan namespace
        namespace: String,
    },

    /// Migration CR exists but has no per-VM status yet
    #[error("migration {migration} has no VM status")]
    MigrationStatusMissing {
        /// Migration CR name
        migration: String,
    },

    /// VM status has no pipeline or no failed step within it
    #[error("VM {vm} has no failed pipeline step in migration {migration}")]
    VmPipelineMissing {
        /// VM name
        vm: String,
        /// Migration CR name
        migration: String,
    },

    /// VM is absent from the migration status entirely
    #[error("VM {vm} not found in migration {migration} status")]
    VmNotFoundInRun {
        /// VM name
        vm: String,
        /// Migration CR name
        migration: String,
    },

    /// VMs in one plan failed at different pipeline steps
    #[error("VMs failed at different steps: {steps:?}")]
    InconsistentFailureStep {
        /// Failed step per VM, as (vm, step)
        steps: Vec<(String, String)>,
    },

    /// VMs failed at a step other than the expected one
    #[error("VMs failed at step {actual}, expected {expected}")]
    UnexpectedFailureStep {
        /// Step the scenario expected
        expected: String,
        /// Step the VMs actually failed at
        actual: String,
    },

    /// Validation error for scenario input or mapping construction
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.map.storage")
        field: Option<String>,
    },

    /// Hypervisor provider error
    #[error("provider error [{provider}]: {message}")]
    Provider {
        /// Provider type (vsphere, ovirt, openstack, ova, openshift)
        provider: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Operation not offered by this provider
    #[error("{operation} is not supported by {provider}")]
    Unsupported {
        /// Provider type
        provider: String,
        /// Operation that was attempted
        operation: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "poller", "runner")
        context: String,
    },
}

fn query_suffix(query: &Option<String>) -> String {
    match query {
        Some(q) => format!(" matching query '{q}'"),
        None => String::new(),
    }
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable provider error
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (e.g., bad credentials)
    pub fn provider_permanent(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            operation: operation.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only transport-level failures are retried. Everything describing the
    /// state of a migration is final for the scenario that observed it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Http { source } => {
                source.is_timeout()
                    || source.is_connect()
                    || source.status().is_some_and(|s| s.is_server_error())
            }
            Error::Provider { retryable, .. } => *retryable,
            Error::Internal { .. } => true,
            _ => false,
        }
    }

    /// True for the lookup errors raised while classifying a failed migration
    pub fn is_classification_lookup(&self) -> bool {
        matches!(
            self,
            Error::MigrationNotFound { .. }
                | Error::MigrationStatusMissing { .. }
                | Error::VmPipelineMissing { .. }
                | Error::VmNotFoundInRun { .. }
        )
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
