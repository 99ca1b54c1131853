//! Key Vault stage
//!
//! Vaults are the one kind that may legitimately pre-exist under any name,
//! so this stage lists candidates in the resource group first: zero matches
//! creates a fresh vault with a generated suffix, exactly one is
//! auto-selected, and two or more demand an explicit name.

use super::StageContext;
use crate::arm::auth;
use crate::arm::client::ArmClient;
use crate::config::generate_vault_name;
use crate::error::Result;
use crate::resource::descriptor::{ResourceDescriptor, ResourceKind};
use crate::resource::outputs::ExportedOutputs;
use crate::resource::reconciler::{disambiguate, reconcile, ResourceSpec, Selection};
use serde_json::{json, Value};

const VAULT_RESOURCE_TYPE: &str = "Microsoft.KeyVault/vaults";

struct KeyVaultSpec {
    desc: ResourceDescriptor,
    tenant_id: String,
}

impl ResourceSpec for KeyVaultSpec {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.desc
    }

    fn url(&self, client: &ArmClient) -> String {
        client.keyvault_url(&self.desc.resource_group, &self.desc.name)
    }

    fn create_body(&self) -> Value {
        json!({
            "location": self.desc.location,
            "properties": {
                "tenantId": self.tenant_id,
                "sku": {"family": "A", "name": "standard"},
                "enableRbacAuthorization": true,
                "accessPolicies": []
            }
        })
    }
}

/// Required-key checks, run before the first cloud call. The tenant ID is
/// needed even with a static token: vault create bodies carry it.
pub fn preflight(_settings: &crate::config::Settings) -> Result<()> {
    auth::tenant_id()?;
    Ok(())
}

pub async fn run(ctx: &StageContext) -> Result<ExportedOutputs> {
    let tenant_id = auth::tenant_id()?;

    let list_url = ctx
        .client
        .resources_in_group_url(&ctx.resource_group, VAULT_RESOURCE_TYPE);
    let listing = ctx.client.get(&list_url).await?;

    let candidates: Vec<String> = listing
        .get("value")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.get("name").and_then(|n| n.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    tracing::info!(
        "Found {} key vault(s) in resource group '{}'",
        candidates.len(),
        ctx.resource_group
    );

    let selection = disambiguate(
        &candidates,
        ctx.settings.keyvault_name.as_deref(),
        "KEYVAULT_NAME",
        || generate_vault_name("kv-subnetcalc"),
    )?;

    let (name, details) = match selection {
        Selection::Existing(name) => {
            tracing::info!("Using existing key vault '{}'", name);
            // The listing is a thin record; fetch the full vault for its URI
            let details = ctx
                .client
                .get(&ctx.client.keyvault_url(&ctx.resource_group, &name))
                .await?;
            (name, details)
        }
        Selection::Create(name) => {
            let spec = KeyVaultSpec {
                desc: ResourceDescriptor::new(
                    ResourceKind::KeyVault,
                    &name,
                    &ctx.resource_group,
                    &ctx.location,
                ),
                tenant_id,
            };
            let outcome = reconcile(&ctx.client, &spec, &ctx.settings.poll_policy()).await?;
            (name, outcome.details().clone())
        }
    };

    let mut outputs = ExportedOutputs::new();
    outputs.push("KEYVAULT_NAME", name);
    outputs.push_from("KEYVAULT_ID", &details, "id");
    outputs.push_from("KEYVAULT_URI", &details, "properties.vaultUri");

    Ok(outputs)
}
