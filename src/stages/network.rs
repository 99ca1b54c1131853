//! Virtual network stage
//!
//! Reconciles the VNet that hosts API Management and its dedicated subnet.
//! Mode `None` means the deployment runs without VNet integration and the
//! stage has nothing to do.

use super::StageContext;
use crate::arm::client::ArmClient;
use crate::config::VnetMode;
use crate::error::Result;
use crate::resource::descriptor::{ResourceDescriptor, ResourceKind};
use crate::resource::outputs::ExportedOutputs;
use crate::resource::reconciler::{reconcile, ResourceSpec};
use serde_json::{json, Value};

struct VnetSpec {
    desc: ResourceDescriptor,
    address_prefix: String,
    subnet_name: String,
    subnet_prefix: String,
}

impl ResourceSpec for VnetSpec {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.desc
    }

    fn url(&self, client: &ArmClient) -> String {
        client.vnet_url(&self.desc.resource_group, &self.desc.name)
    }

    fn create_body(&self) -> Value {
        json!({
            "location": self.desc.location,
            "properties": {
                "addressSpace": {
                    "addressPrefixes": [self.address_prefix]
                },
                "subnets": [{
                    "name": self.subnet_name,
                    "properties": {
                        "addressPrefix": self.subnet_prefix
                    }
                }]
            }
        })
    }
}

struct SubnetSpec {
    desc: ResourceDescriptor,
    vnet_name: String,
    prefix: String,
}

impl ResourceSpec for SubnetSpec {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.desc
    }

    fn url(&self, client: &ArmClient) -> String {
        client.subnet_url(&self.desc.resource_group, &self.vnet_name, &self.desc.name)
    }

    fn create_body(&self) -> Value {
        json!({
            "properties": {
                "addressPrefix": self.prefix
            }
        })
    }
}

/// Required-key and allow-list checks, run before the first cloud call
pub fn preflight(settings: &crate::config::Settings) -> Result<()> {
    let mode = settings.vnet_mode()?;
    if mode != VnetMode::None {
        settings.vnet_prefix()?;
        settings.subnet_prefix()?;
    }
    Ok(())
}

pub async fn run(ctx: &StageContext) -> Result<ExportedOutputs> {
    let mode = ctx.settings.vnet_mode()?;

    let mut outputs = ExportedOutputs::new();
    outputs.push("VNET_MODE", mode.as_str());

    if mode == VnetMode::None {
        tracing::info!("VNet mode is None, no network to create");
        return Ok(outputs);
    }

    let vnet_name = ctx.settings.vnet_name().to_string();
    let vnet_prefix = ctx.settings.vnet_prefix()?.to_string();
    let subnet_name = ctx.settings.subnet_name().to_string();
    let subnet_prefix = ctx.settings.subnet_prefix()?.to_string();
    let policy = ctx.settings.poll_policy();

    let vnet = VnetSpec {
        desc: ResourceDescriptor::new(
            ResourceKind::VirtualNetwork,
            &vnet_name,
            &ctx.resource_group,
            &ctx.location,
        ),
        address_prefix: vnet_prefix,
        subnet_name: subnet_name.clone(),
        subnet_prefix: subnet_prefix.clone(),
    };
    let vnet_outcome = reconcile(&ctx.client, &vnet, &policy).await?;

    // The subnet can be missing when the VNet predates this pipeline; a fresh
    // create carries it inline, so this pass finds it and does nothing.
    let subnet = SubnetSpec {
        desc: ResourceDescriptor::new(
            ResourceKind::Subnet,
            &subnet_name,
            &ctx.resource_group,
            &ctx.location,
        ),
        vnet_name: vnet_name.clone(),
        prefix: subnet_prefix,
    };
    let subnet_outcome = reconcile(&ctx.client, &subnet, &policy).await?;

    outputs.push("VNET_NAME", vnet_name);
    outputs.push_from("VNET_ID", vnet_outcome.details(), "id");
    outputs.push("SUBNET_NAME", subnet_name);
    outputs.push_from("APIM_SUBNET_ID", subnet_outcome.details(), "id");

    Ok(outputs)
}
