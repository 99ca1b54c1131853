//! Resource Groups
//!
//! Lookup of the resource group that scopes every reconciled resource.
//! Groups are a hard dependency: azprov reads them, never creates them.

use super::client::ArmClient;
use crate::error::Result;
use serde_json::Value;

/// Resource group information
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct ResourceGroup {
    pub name: String,
    pub id: String,
    pub location: String,
}

impl From<&Value> for ResourceGroup {
    fn from(value: &Value) -> Self {
        Self {
            name: value
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string(),
            id: value
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string(),
            location: value
                .get("location")
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string(),
        }
    }
}

/// Fetch a resource group by name; `None` if it does not exist
pub async fn get_resource_group(client: &ArmClient, name: &str) -> Result<Option<ResourceGroup>> {
    let url = client.resource_group_url(name);
    let response = client.get_optional(&url).await?;
    Ok(response.as_ref().map(ResourceGroup::from))
}
