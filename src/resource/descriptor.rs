//! Resource identity and provisioning lifecycle types.

use serde_json::Value;
use std::fmt;

/// The resource kinds the pipeline manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ApiManagement,
    VirtualNetwork,
    Subnet,
    Peering,
    KeyVault,
    ManagedIdentity,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ApiManagement => "API Management service",
            ResourceKind::VirtualNetwork => "virtual network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Peering => "VNet peering",
            ResourceKind::KeyVault => "key vault",
            ResourceKind::ManagedIdentity => "managed identity",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one cloud object the reconciler manages
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
    pub resource_group: String,
    pub location: String,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: &str, resource_group: &str, location: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            resource_group: resource_group.to_string(),
            location: location.to_string(),
        }
    }
}

/// Provider-reported lifecycle status. Only the cloud mutates it; the
/// reconciler reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    NotFound,
    Creating,
    Succeeded,
    Failed,
    Unknown,
}

impl ProvisioningState {
    /// Parse an ARM `provisioningState` string. Total: unrecognized values
    /// map to `Unknown` rather than failing the poll loop.
    pub fn parse(state: &str) -> Self {
        match state {
            "Succeeded" => ProvisioningState::Succeeded,
            "Failed" | "Canceled" => ProvisioningState::Failed,
            "Creating" | "Updating" | "Accepted" | "InProgress" | "Activating" => {
                ProvisioningState::Creating
            }
            _ => ProvisioningState::Unknown,
        }
    }

    /// Read the state out of a full ARM resource payload
    pub fn of(details: &Value) -> Self {
        details
            .get("properties")
            .and_then(|p| p.get("provisioningState"))
            .and_then(|s| s.as_str())
            .map(Self::parse)
            .unwrap_or(ProvisioningState::Unknown)
    }

    #[allow(dead_code)]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Succeeded | ProvisioningState::Failed
        )
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisioningState::NotFound => "NotFound",
            ProvisioningState::Creating => "Creating",
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Failed => "Failed",
            ProvisioningState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}
