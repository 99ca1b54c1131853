//! VNet peering stage
//!
//! Establishes peering between the APIM network and a second network, in
//! both directions. Both networks are hard dependencies: peering never
//! creates them.

use super::StageContext;
use crate::arm::client::ArmClient;
use crate::error::{ProvisionError, Result};
use crate::resource::descriptor::{ResourceDescriptor, ResourceKind};
use crate::resource::outputs::ExportedOutputs;
use crate::resource::reconciler::{reconcile, ResourceSpec};
use serde_json::{json, Value};

struct PeeringSpec {
    desc: ResourceDescriptor,
    /// The VNet this peering hangs off
    vnet_name: String,
    /// Full resource ID of the network on the other end
    remote_id: String,
}

impl ResourceSpec for PeeringSpec {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.desc
    }

    fn url(&self, client: &ArmClient) -> String {
        client.peering_url(&self.desc.resource_group, &self.vnet_name, &self.desc.name)
    }

    fn create_body(&self) -> Value {
        json!({
            "properties": {
                "remoteVirtualNetwork": {"id": self.remote_id},
                "allowVirtualNetworkAccess": true,
                "allowForwardedTraffic": true
            }
        })
    }
}

/// Required-key checks, run before the first cloud call
pub fn preflight(settings: &crate::config::Settings) -> Result<()> {
    settings.peer_vnet_name()?;
    Ok(())
}

pub async fn run(ctx: &StageContext) -> Result<ExportedOutputs> {
    let local_vnet = ctx.settings.vnet_name().to_string();
    let peer_vnet = ctx.settings.peer_vnet_name()?.to_string();
    let peer_rg = ctx
        .settings
        .peer_resource_group
        .clone()
        .unwrap_or_else(|| ctx.resource_group.clone());

    // Both ends must already exist; probe them together
    let (local, remote) = futures::future::try_join(
        ctx.client
            .get_optional(&ctx.client.vnet_url(&ctx.resource_group, &local_vnet)),
        ctx.client
            .get_optional(&ctx.client.vnet_url(&peer_rg, &peer_vnet)),
    )
    .await?;

    if local.is_none() {
        return Err(ProvisionError::missing_dependency(
            "virtual network",
            &local_vnet,
            &ctx.resource_group,
        ));
    }
    if remote.is_none() {
        return Err(ProvisionError::missing_dependency(
            "virtual network",
            &peer_vnet,
            &peer_rg,
        ));
    }

    let forward_name = format!("peer-{}-to-{}", local_vnet, peer_vnet);
    let reverse_name = format!("peer-{}-to-{}", peer_vnet, local_vnet);

    let (forward, reverse) = futures::future::try_join(
        ctx.client
            .get_optional(&ctx.client.peering_url(&ctx.resource_group, &local_vnet, &forward_name)),
        ctx.client
            .get_optional(&ctx.client.peering_url(&peer_rg, &peer_vnet, &reverse_name)),
    )
    .await?;

    let mut outputs = ExportedOutputs::new();
    outputs.push("PEERING_FORWARD", &*forward_name);
    outputs.push("PEERING_REVERSE", &*reverse_name);

    if forward.is_some() && reverse.is_some() {
        tracing::info!("Peering already established in both directions, nothing to create");
        return Ok(outputs);
    }

    let policy = ctx.settings.poll_policy();

    if forward.is_none() {
        let spec = PeeringSpec {
            desc: ResourceDescriptor::new(
                ResourceKind::Peering,
                &forward_name,
                &ctx.resource_group,
                &ctx.location,
            ),
            vnet_name: local_vnet.clone(),
            remote_id: ctx.client.vnet_id(&peer_rg, &peer_vnet),
        };
        reconcile(&ctx.client, &spec, &policy).await?;
    } else {
        tracing::info!("Peering '{}' already exists", forward_name);
    }

    if reverse.is_none() {
        let spec = PeeringSpec {
            desc: ResourceDescriptor::new(
                ResourceKind::Peering,
                &reverse_name,
                &peer_rg,
                &ctx.location,
            ),
            vnet_name: peer_vnet.clone(),
            remote_id: ctx.client.vnet_id(&ctx.resource_group, &local_vnet),
        };
        reconcile(&ctx.client, &spec, &policy).await?;
    } else {
        tracing::info!("Peering '{}' already exists", reverse_name);
    }

    Ok(outputs)
}
