//! Idempotent resource reconciliation
//!
//! One shared probe/create/poll pass instantiated per resource kind, instead
//! of five near-identical script bodies. Kind-specific knowledge (URL, create
//! body, whether the control plane completes the create synchronously) lives
//! in a [`ResourceSpec`] strategy object.

use crate::arm::client::ArmClient;
use crate::error::{ProvisionError, Result};
use crate::resource::descriptor::{ProvisioningState, ResourceDescriptor};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Whether the create call completes on its own or needs the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// The PUT response is the finished resource
    Sync,
    /// The PUT is asynchronous acceptance; poll until a terminal state
    Async,
}

/// Kind-specific parameters of one reconcile pass
pub trait ResourceSpec {
    fn descriptor(&self) -> &ResourceDescriptor;

    /// Full ARM URL of the resource (probe, create, and poll all target it)
    fn url(&self, client: &ArmClient) -> String;

    /// Request body for the create PUT
    fn create_body(&self) -> Value;

    fn create_mode(&self) -> CreateMode {
        CreateMode::Sync
    }
}

/// Polling policy for asynchronous creates.
///
/// The interval matches the 30-second cadence of the original scripts. The
/// deadline is new: the scripts polled forever and relied on the operator's
/// session expiring.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            deadline: None,
        }
    }
}

/// How the reconcile pass converged
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// The resource was already there; no create call was issued
    AlreadyExists(Value),
    /// The resource was created (and, for async kinds, polled to Succeeded)
    Created(Value),
}

impl ReconcileOutcome {
    pub fn details(&self) -> &Value {
        match self {
            ReconcileOutcome::AlreadyExists(v) | ReconcileOutcome::Created(v) => v,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, ReconcileOutcome::Created(_))
    }
}

/// Reconcile one resource: probe, create when absent, poll async kinds.
///
/// Existence is always checked before creation, so repeat invocations
/// converge without a second create call.
pub async fn reconcile(
    client: &ArmClient,
    spec: &impl ResourceSpec,
    policy: &PollPolicy,
) -> Result<ReconcileOutcome> {
    let desc = spec.descriptor();
    let url = spec.url(client);

    tracing::info!("Checking for existing {} '{}'", desc.kind, desc.name);

    if let Some(existing) = client.get_optional(&url).await? {
        tracing::info!("{} '{}' already exists, skipping creation", desc.kind, desc.name);
        return Ok(ReconcileOutcome::AlreadyExists(existing));
    }

    tracing::info!(
        "Creating {} '{}' in resource group '{}'",
        desc.kind,
        desc.name,
        desc.resource_group
    );

    let created = client.put(&url, &spec.create_body()).await.map_err(|err| {
        ProvisionError::creation(desc.kind.as_str(), &desc.name, err.to_string())
    })?;

    match ProvisioningState::of(&created) {
        ProvisioningState::Succeeded => Ok(ReconcileOutcome::Created(created)),
        ProvisioningState::Failed => Err(ProvisionError::creation(
            desc.kind.as_str(),
            &desc.name,
            "provisioning ended in Failed state",
        )),
        state => match spec.create_mode() {
            // Some sync kinds (managed identities) return no provisioningState
            // at all; a non-empty body without one is the finished resource.
            CreateMode::Sync if state == ProvisioningState::Unknown && !created.is_null() => {
                Ok(ReconcileOutcome::Created(created))
            }
            _ => {
                let details = wait_for_provisioning(client, &url, desc, policy).await?;
                Ok(ReconcileOutcome::Created(details))
            }
        },
    }
}

/// Poll a resource URL until provisioning reaches a terminal state.
///
/// State machine: Creating -> {Succeeded | Failed}, with Unknown and query
/// errors treated as transient. Only GETs are issued here; the elapsed
/// counter never resets.
pub async fn wait_for_provisioning(
    client: &ArmClient,
    url: &str,
    desc: &ResourceDescriptor,
    policy: &PollPolicy,
) -> Result<Value> {
    let started = Instant::now();

    tracing::info!(
        "Waiting for {} '{}' (polling every {}s)",
        desc.kind,
        desc.name,
        policy.interval.as_secs()
    );

    loop {
        tokio::time::sleep(policy.interval).await;
        let elapsed = started.elapsed();

        if let Some(deadline) = policy.deadline {
            if elapsed >= deadline {
                return Err(ProvisionError::DeadlineExceeded {
                    kind: desc.kind.as_str(),
                    name: desc.name.clone(),
                    deadline_secs: deadline.as_secs(),
                });
            }
        }

        match client.get_optional(url).await {
            Ok(Some(details)) => match ProvisioningState::of(&details) {
                ProvisioningState::Succeeded => {
                    tracing::info!(
                        "{} '{}' provisioning succeeded after {}s",
                        desc.kind,
                        desc.name,
                        elapsed.as_secs()
                    );
                    return Ok(details);
                }
                ProvisioningState::Failed => {
                    return Err(ProvisionError::creation(
                        desc.kind.as_str(),
                        &desc.name,
                        "provisioning ended in Failed state",
                    ));
                }
                state => {
                    tracing::info!(
                        "{} '{}' is {} after {}s, still waiting",
                        desc.kind,
                        desc.name,
                        state,
                        elapsed.as_secs()
                    );
                }
            },
            // Visible lag right after async acceptance
            Ok(None) => {
                tracing::debug!(
                    "{} '{}' not visible yet after {}s",
                    desc.kind,
                    desc.name,
                    elapsed.as_secs()
                );
            }
            Err(err) => {
                let transient = ProvisionError::TransientQuery(err.to_string());
                tracing::warn!("{transient}; continuing to poll");
            }
        }
    }
}

/// Outcome of candidate selection within a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// An existing resource was chosen
    Existing(String),
    /// No usable candidate; create under this name
    Create(String),
}

/// 0/1/many selection policy for kinds that may already exist under any name.
///
/// Zero candidates: create with a generated name. Exactly one: auto-select
/// it. Two or more: an explicit name is required.
pub fn disambiguate(
    candidates: &[String],
    explicit: Option<&str>,
    field: &'static str,
    generate: impl FnOnce() -> String,
) -> Result<Selection> {
    if let Some(name) = explicit {
        if candidates.iter().any(|c| c == name) {
            return Ok(Selection::Existing(name.to_string()));
        }
        return Ok(Selection::Create(name.to_string()));
    }

    match candidates {
        [] => Ok(Selection::Create(generate())),
        [single] => Ok(Selection::Existing(single.clone())),
        _ => Err(ProvisionError::validation(
            field,
            format!(
                "{} candidates exist in the resource group ({}); set an explicit name",
                candidates.len(),
                candidates.join(", ")
            ),
        )),
    }
}
