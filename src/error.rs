//! Error types for the provisioning pipeline.
//!
//! Every fatal variant maps to a `[ERROR]`-tagged stderr line and exit code 1
//! at the process boundary. `TransientQuery` is the one non-fatal case: the
//! completion poller logs it and keeps waiting.

/// The result type used throughout azprov.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that can occur while reconciling a resource.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// A required configuration key is missing or empty.
    /// Detected before any cloud call.
    #[error("missing required configuration: {key}")]
    Configuration {
        /// The option or environment variable that was absent.
        key: String,
    },

    /// An input value failed an allow-list or format check.
    #[error("invalid {field}: {message}")]
    Validation {
        /// The option that carried the bad value.
        field: &'static str,
        /// What made it invalid, including the accepted values where useful.
        message: String,
    },

    /// A pre-existing dependency is absent. Never auto-created.
    #[error("{kind} '{name}' not found in resource group '{resource_group}'")]
    NotFound {
        kind: &'static str,
        name: String,
        resource_group: String,
    },

    /// The create call failed, or provisioning reached the Failed state.
    /// No rollback is attempted; cleanup is the operator's job.
    #[error("failed to create {kind} '{name}': {message}")]
    Creation {
        kind: &'static str,
        name: String,
        message: String,
    },

    /// A status query failed while polling. The loop continues.
    #[error("transient status query failure: {0}")]
    TransientQuery(String),

    /// Provisioning did not reach a terminal state within the poll deadline.
    #[error("provisioning of {kind} '{name}' did not finish within {deadline_secs}s")]
    DeadlineExceeded {
        kind: &'static str,
        name: String,
        deadline_secs: u64,
    },

    /// A control-plane request failed outside the categories above
    /// (auth failure, network error, unexpected status).
    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

impl ProvisionError {
    pub fn configuration(key: impl Into<String>) -> Self {
        Self::Configuration { key: key.into() }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn missing_dependency(
        kind: &'static str,
        name: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
            resource_group: resource_group.into(),
        }
    }

    pub fn creation(
        kind: &'static str,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Creation {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_names_the_key() {
        let err = ProvisionError::configuration("RESOURCE_GROUP");
        assert_eq!(
            err.to_string(),
            "missing required configuration: RESOURCE_GROUP"
        );
    }

    #[test]
    fn validation_error_carries_field_and_reason() {
        let err = ProvisionError::validation("APIM_SKU", "got 'Gold'");
        assert_eq!(err.to_string(), "invalid APIM_SKU: got 'Gold'");
    }
}
