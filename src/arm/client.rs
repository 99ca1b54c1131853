//! ARM Client
//!
//! Main client for the Azure Resource Manager API, combining authentication
//! and HTTP functionality with per-provider URL builders.

use super::auth::AzureCredentials;
use super::http::ArmHttpClient;
use crate::error::Result;
use anyhow::Context;
use serde_json::Value;

/// Public ARM endpoint; override with AZURE_ARM_ENDPOINT for testing or
/// sovereign clouds
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

// Pinned api-versions per resource provider
const API_VERSION_RESOURCES: &str = "2021-04-01";
const API_VERSION_APIM: &str = "2022-08-01";
const API_VERSION_NETWORK: &str = "2023-09-01";
const API_VERSION_KEYVAULT: &str = "2023-07-01";
const API_VERSION_IDENTITY: &str = "2023-01-31";

/// Main ARM client
#[derive(Clone)]
pub struct ArmClient {
    pub credentials: AzureCredentials,
    pub http: ArmHttpClient,
    pub subscription_id: String,
    endpoint: String,
}

impl ArmClient {
    /// Create a new ARM client against the public endpoint (or the
    /// AZURE_ARM_ENDPOINT override)
    pub fn new(credentials: AzureCredentials, subscription_id: &str) -> Result<Self> {
        let endpoint = match std::env::var("AZURE_ARM_ENDPOINT") {
            Ok(value) if !value.trim().is_empty() => value,
            _ => DEFAULT_ENDPOINT.to_string(),
        };
        Self::with_endpoint(credentials, subscription_id, &endpoint)
    }

    /// Create a client against an explicit endpoint
    pub fn with_endpoint(
        credentials: AzureCredentials,
        subscription_id: &str,
        endpoint: &str,
    ) -> Result<Self> {
        let parsed = url::Url::parse(endpoint)
            .with_context(|| format!("Invalid ARM endpoint: {endpoint}"))?;

        Ok(Self {
            credentials,
            http: ArmHttpClient::new()?,
            subscription_id: subscription_id.to_string(),
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Make a GET request to an ARM endpoint
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        Ok(self.http.get(url, &token).await?)
    }

    /// Probe an ARM endpoint; `None` means 404, any other failure is an error
    pub async fn get_optional(&self, url: &str) -> Result<Option<Value>> {
        let token = self.get_token().await?;
        Ok(self.http.get_optional(url, &token).await?)
    }

    /// Make a PUT request to an ARM endpoint
    pub async fn put(&self, url: &str, body: &Value) -> Result<Value> {
        let token = self.get_token().await?;
        Ok(self.http.put(url, &token, body).await?)
    }

    fn subscription_prefix(&self) -> String {
        format!("{}/subscriptions/{}", self.endpoint, self.subscription_id)
    }

    fn group_prefix(&self, resource_group: &str) -> String {
        format!(
            "{}/resourceGroups/{}",
            self.subscription_prefix(),
            resource_group
        )
    }

    // =========================================================================
    // Resource group / generic resources
    // =========================================================================

    /// Build a resource group URL
    pub fn resource_group_url(&self, resource_group: &str) -> String {
        format!(
            "{}?api-version={}",
            self.group_prefix(resource_group),
            API_VERSION_RESOURCES
        )
    }

    /// Build a list-by-scope URL filtered to one resource type,
    /// e.g. `Microsoft.KeyVault/vaults`
    pub fn resources_in_group_url(&self, resource_group: &str, resource_type: &str) -> String {
        let filter = format!("resourceType eq '{}'", resource_type);
        format!(
            "{}/resources?api-version={}&$filter={}",
            self.group_prefix(resource_group),
            API_VERSION_RESOURCES,
            urlencoding::encode(&filter)
        )
    }

    // =========================================================================
    // API Management
    // =========================================================================

    /// Build an API Management service URL
    pub fn apim_url(&self, resource_group: &str, name: &str) -> String {
        format!(
            "{}/providers/Microsoft.ApiManagement/service/{}?api-version={}",
            self.group_prefix(resource_group),
            name,
            API_VERSION_APIM
        )
    }

    // =========================================================================
    // Networking
    // =========================================================================

    /// Build a virtual network URL
    pub fn vnet_url(&self, resource_group: &str, name: &str) -> String {
        format!(
            "{}/providers/Microsoft.Network/virtualNetworks/{}?api-version={}",
            self.group_prefix(resource_group),
            name,
            API_VERSION_NETWORK
        )
    }

    /// Build a subnet URL
    pub fn subnet_url(&self, resource_group: &str, vnet: &str, subnet: &str) -> String {
        format!(
            "{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}?api-version={}",
            self.group_prefix(resource_group),
            vnet,
            subnet,
            API_VERSION_NETWORK
        )
    }

    /// Build a VNet peering URL
    pub fn peering_url(&self, resource_group: &str, vnet: &str, peering: &str) -> String {
        format!(
            "{}/providers/Microsoft.Network/virtualNetworks/{}/virtualNetworkPeerings/{}?api-version={}",
            self.group_prefix(resource_group),
            vnet,
            peering,
            API_VERSION_NETWORK
        )
    }

    /// Resource ID of a virtual network (no endpoint, no api-version);
    /// used as `remoteVirtualNetwork.id` in peering bodies
    pub fn vnet_id(&self, resource_group: &str, name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}",
            self.subscription_id, resource_group, name
        )
    }

    // =========================================================================
    // Key Vault
    // =========================================================================

    /// Build a Key Vault URL
    pub fn keyvault_url(&self, resource_group: &str, name: &str) -> String {
        format!(
            "{}/providers/Microsoft.KeyVault/vaults/{}?api-version={}",
            self.group_prefix(resource_group),
            name,
            API_VERSION_KEYVAULT
        )
    }

    // =========================================================================
    // Managed Identity
    // =========================================================================

    /// Build a user-assigned managed identity URL
    pub fn identity_url(&self, resource_group: &str, name: &str) -> String {
        format!(
            "{}/providers/Microsoft.ManagedIdentity/userAssignedIdentities/{}?api-version={}",
            self.group_prefix(resource_group),
            name,
            API_VERSION_IDENTITY
        )
    }
}

/// Format an ARM API error for display
pub fn format_arm_error(error: &anyhow::Error) -> String {
    super::http::format_arm_error(error)
}
